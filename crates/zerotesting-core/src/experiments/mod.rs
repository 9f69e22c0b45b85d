//! Bundled experiments.
//!
//! Each module exports a `MODULE` table; [`MODULES`] lists the ones the
//! dispatcher registers.

pub mod local_inject;
pub mod regression;
pub mod store_regression;
pub mod waku_regression;

use crate::registry::ExperimentModule;

pub const MODULES: &[ExperimentModule] = &[
    waku_regression::MODULE,
    store_regression::MODULE,
    local_inject::MODULE,
];
