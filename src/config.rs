//! Engine configuration loaded from CLI flags, `MSRP_*` environment
//! variables and `.msrp.toml`.

#![expect(
    non_snake_case,
    reason = "Clap/OrthoConfig derive macros generate helper modules with uppercase names"
)]
#![allow(
    missing_docs,
    reason = "OrthoConfig and Clap derive macros generate items that cannot be documented"
)]
#![allow(
    unfulfilled_lint_expectations,
    reason = "derive macros conditionally generate items"
)]

use std::time::Duration;

use clap::Args;
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

use crate::{
    report::{DEFAULT_REPORT_GRANULARITY, DefaultReportMechanism},
    transaction::{
        DEFAULT_MAX_HEADER_BYTES,
        DEFAULT_MAX_NONSEND_BODY,
        INTERRUPTIBLE_THRESHOLD,
        TransactionLimits,
    },
};

const DEFAULT_IO_TIMEOUT_SECS: u64 = 5;

/// Tunables shared by every connection of an engine.
#[expect(
    missing_docs,
    reason = "OrthoConfig derive macro generates items that cannot be documented"
)]
#[derive(Args, OrthoConfig, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[ortho_config(prefix = "MSRP_")]
pub struct EngineConfig {
    /// Maximum header bytes accepted per transaction.
    #[ortho_config(default = DEFAULT_MAX_HEADER_BYTES)]
    #[arg(long, default_value_t = DEFAULT_MAX_HEADER_BYTES)]
    pub max_header_bytes: usize,
    /// Maximum body bytes buffered for transactions without a message.
    #[ortho_config(default = DEFAULT_MAX_NONSEND_BODY)]
    #[arg(long, default_value_t = DEFAULT_MAX_NONSEND_BODY)]
    pub max_nonsend_body_bytes: usize,
    /// Bytes received between success report triggers.
    #[ortho_config(default = DEFAULT_REPORT_GRANULARITY)]
    #[arg(long, default_value_t = DEFAULT_REPORT_GRANULARITY)]
    pub report_granularity: usize,
    /// Bytes pulled from an outgoing transaction per write.
    #[ortho_config(default = INTERRUPTIBLE_THRESHOLD)]
    #[arg(long, default_value_t = INTERRUPTIBLE_THRESHOLD)]
    pub write_chunk_bytes: usize,
    /// Read and write timeout in seconds.
    #[ortho_config(default = DEFAULT_IO_TIMEOUT_SECS)]
    #[arg(long, default_value_t = DEFAULT_IO_TIMEOUT_SECS)]
    pub io_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_header_bytes: DEFAULT_MAX_HEADER_BYTES,
            max_nonsend_body_bytes: DEFAULT_MAX_NONSEND_BODY,
            report_granularity: DEFAULT_REPORT_GRANULARITY,
            write_chunk_bytes: INTERRUPTIBLE_THRESHOLD,
            io_timeout_secs: DEFAULT_IO_TIMEOUT_SECS,
        }
    }
}

impl EngineConfig {
    /// Per-transaction limits derived from this configuration.
    #[must_use]
    pub const fn limits(&self) -> TransactionLimits {
        TransactionLimits {
            max_header_bytes: self.max_header_bytes,
            max_nonsend_body: self.max_nonsend_body_bytes,
        }
    }

    /// Report mechanism counting received bytes in blocks of
    /// `report_granularity`.
    #[must_use]
    pub fn report_mechanism(&self) -> DefaultReportMechanism {
        DefaultReportMechanism::new(self.report_granularity)
    }

    /// Timeout applied to each read and write.
    #[must_use]
    pub const fn io_timeout(&self) -> Duration { Duration::from_secs(self.io_timeout_secs) }
}
