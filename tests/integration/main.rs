//! Integration tests: full engine scenarios against in-memory clients.

mod engine_flow;
mod mock_client;
mod simulation;
