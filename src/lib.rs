//! # D1 Helpers
//!
//! Binding resolution and connection helpers for Cloudflare D1 databases,
//! reached either through the locally emulated SQLite files or through the
//! remote HTTP API.
//!
//! Application code names a database by its binding (`DB`); the helpers
//! read the wrangler configuration, pick the matching `d1_databases` entry,
//! and turn it into a local file path or a set of remote credentials.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────────────────┐
//! │ wrangler.*   │──▶│   D1Helper   │──▶│ local: .wrangler/state/  │
//! │ (config)     │   │  (resolver)  │   │  v3/d1/<hash>.sqlite     │
//! └──────────────┘   └──────┬───────┘   └──────────────────────────┘
//!                           │
//!                           ▼
//!                    ┌──────────────┐
//!                    │ remote: D1   │
//!                    │ REST API     │
//!                    └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! d1h info                          # resolved binding and ids
//! d1h local-file --binding DB       # path of the emulated SQLite file
//! d1h hash my-database-id           # derived local file name
//! d1h query "SELECT 1" --remote     # run through the REST API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | Wrangler configuration reader |
//! | [`helper`] | Binding resolver ([`D1Helper`](helper::D1Helper)) |
//! | [`hash`] | Local file id derivation |
//! | [`session`] | Query interface and row shapes |
//! | [`proxy`] | Remote REST API client |
//! | [`db`] | Local SQLite sessions |
//! | [`platform`] | Local platform proxy and scoped access |
//! | [`error`] | Error kinds |

pub mod config;
pub mod db;
pub mod error;
pub mod hash;
pub mod helper;
pub mod platform;
pub mod proxy;
pub mod session;

pub use error::HelperError;
pub use helper::{D1Helper, D1HelperOptions};
pub use proxy::D1Credentials;
pub use session::{D1Session, ProxyRows, QueryMethod};
