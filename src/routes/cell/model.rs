use serde::{Deserialize, Serialize};

use crate::geocell::GeoCell;

#[derive(Debug, Deserialize)]
pub struct CellQuery {
    pub latitude: f64,
    pub longitude: f64,
    pub step_seconds: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct CellEntry {
    pub canonical: String,
    pub cell_id: String,
}

impl From<GeoCell> for CellEntry {
    fn from(cell: GeoCell) -> Self {
        Self {
            canonical: cell.canonical,
            cell_id: cell.id,
        }
    }
}

/// 所在格及 9 格列表（自身在前，邻格按固定顺序）
#[derive(Debug, Serialize)]
pub struct CellInfo {
    pub canonical: String,
    pub cell_id: String,
    pub step_seconds: u32,
    pub neighborhood: Vec<CellEntry>,
}
