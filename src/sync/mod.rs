// This module is split into smaller files to keep each file focused.
// The pieces are `include!`'d so everything remains in `crate::sync`.

pub mod http;

include!("parts/01_prelude.rs");
include!("parts/02_reconcile.rs");
