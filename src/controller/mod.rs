//! Controller Module - Orchestrierung eines Anrufs
//!
//! Der `CallController` ist die einzige Stelle, die den `SessionStore`
//! verändert. Er verbindet:
//! - Kommandos der UI (mute, Aufnahme, Layout, ...)
//! - Events des `SignalingClient` und der `MediaPipeline`
//! - Untertitel des Übersetzungsdienstes
//!
//! Alle Eingänge laufen durch einen Worker-Task und werden strikt
//! nacheinander verarbeitet. Änderungen werden als `CallEvent` gesendet.
//!

mod command;
mod events;
mod handle;
mod worker;


pub use events::CallEvent;
pub use handle::CallController;
