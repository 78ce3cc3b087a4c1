//! History Module - abgeschlossene Anrufe
//!
//! - `CallHistory` wird einmalig erzeugt, wenn ein Anruf terminal wird
//! - `HistoryDatabase` persistiert die Einträge in SQLite
//!

mod database;
mod record;

pub use database::{HistoryDatabase, HistoryError};
pub use record::{CallHistory, HistoryParticipant};
