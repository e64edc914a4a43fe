//! # ota-manifest
//!
//! The update manifest served to OTA agents, its YAML decoding, and the
//! validation every manifest must pass before an agent acts on it.
//!
//! ## Document shape
//!
//! ```yaml
//! version: "1.2.0"
//! files:
//!   - name: "app"
//!     url: "https://updates.example.com/apps/demo/files/app"
//!     sha256: "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08"
//!     target: "/opt/demo/bin/app"
//!     version: "1.2.0"   # optional, defaults to the manifest version
//! restart_cmd: "systemctl restart demo"   # optional
//! ```
//!
//! ## Invariants
//!
//! - A manifest is validated as a whole; one bad entry rejects the document
//! - File names are unique within a manifest
//! - Checksums are compared case-insensitively

mod error;
mod types;

pub use error::ManifestError;
pub use types::{FileEntry, Manifest, MAX_VERSION_LEN, SHA256_HEX_LEN};
