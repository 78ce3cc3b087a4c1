//! Crypto Module - Identität des lokalen Teilnehmers
//!
//! Ein Ed25519 Schlüsselpaar pro Installation, abgelegt im Datenverzeichnis.
//! Jede Nachricht an den Signaling-Server wird über ihren kanonischen
//! JSON-Payload signiert, damit der Server den Absender prüfen kann.

mod keypair;

pub use keypair::{KeyPair, KeyPairError};
