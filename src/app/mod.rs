//! Application state shared across connections

mod state;

pub use state::AppState;
