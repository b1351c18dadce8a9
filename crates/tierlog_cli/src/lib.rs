//! Command-line front end for `tierlog`.
//!
//! Every subcommand maps to one `cmd_*` function in [`commands`] that returns
//! the text to print, so the binary only parses arguments and dispatches.
//! `watch` is the long-running exception: it drives refresh, ingest and
//! automatic compaction from cooperative timers (see [`watch`]).
//!
//! The summarizer comes from the configured provider, or from `--provider`
//! where a subcommand accepts it. `mock` needs no credentials and returns a
//! canned summary.

pub mod cli;
pub mod commands;
pub mod summarizers;
pub mod watch;
