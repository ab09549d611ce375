//! Deck navigator: body-gesture navigation for flashcard decks.
//!
//! Turns a stream of pose-estimator landmark frames into debounced,
//! cooldown-gated NEXT / PREV / SELECT commands.

pub mod config;
pub mod gesture;
pub mod ipc;
pub mod recording;
pub mod state;
pub mod store;
