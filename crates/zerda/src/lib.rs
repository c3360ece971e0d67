//! Zerda: a bot that keeps a "Currently Playing" role in sync with what
//! guild members are running.
//!
//! The reconciliation logic lives in the `reconciler` crate. This crate wires
//! it to the platform:
//! - [`discord`]: REST directory adapter and the gateway-fed guild cache
//! - [`gateway`]: dispatch event parsing, the [`gateway::Bot`], and the event loop
//! - [`commands`] / [`replies`]: operator slash commands
//! - [`config`] / [`logging`]: process setup

pub mod commands;
pub mod config;
pub mod discord;
pub mod gateway;
pub mod logging;
pub mod replies;

pub use commands::{AppLookup, Application};
pub use config::BotConfig;
pub use discord::{GuildCache, HttpDirectory, SharedGuildCache};
pub use gateway::{run_event_loop, Bot, GatewayEvent};
pub use replies::{InteractionRef, Reply, Responder, Signal};
