mod handler;
mod model;

pub use handler::get_cells;
pub use model::{CellEntry, CellInfo, CellQuery};
