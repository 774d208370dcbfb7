//! CLI command implementations
//!
//! Every command returns its process exit code:
//!
//! | code | meaning |
//! |------|---------|
//! | 0 | success |
//! | 1 | partial success |
//! | 2 | configuration error |
//! | 3 | import waiting for patient resolution |
//! | 4 | converter or store unreachable |
//! | 5 | fatal error |

pub mod export;
pub mod import;
pub mod init;
pub mod resolve;
pub mod services;
pub mod status;
pub mod transform;
pub mod validate;

pub const EXIT_OK: i32 = 0;
pub const EXIT_PARTIAL: i32 = 1;
pub const EXIT_CONFIG: i32 = 2;
pub const EXIT_AWAITING_PATIENT: i32 = 3;
pub const EXIT_CONNECTION: i32 = 4;
pub const EXIT_FATAL: i32 = 5;
