//! Argument coverage agent.
//!
//! ```bash
//! cargo build --release
//! java -agentpath:target/release/libargcov_agent.so=output=coverage.txt,include=prefix=com.acme. MyApp
//! ```
//!
//! Options can also come from `ARGCOV_*` environment variables, e.g.
//! `ARGCOV_LOG=argcov=debug` for per-class output on stderr.

argcov::export_agent!(argcov::agent::ArgCoverageAgent);
