//! Handoff from negotiation to the UDP session transport.
//!
//! Once a [`ServerAnnouncement`] exists, negotiation is done. Everything the
//! session client needs is packed into a [`SessionHandoff`] and passed by
//! value to a [`SessionTransport`], which owns the session from then on.

use async_trait::async_trait;
use serde::Serialize;

use crate::bootstrap::ServerAnnouncement;
use crate::error::Result;
use crate::params::{ClientParameters, PredictionMode};

/// Terminal dimensions in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TermSize {
    pub cols: u16,
    pub rows: u16,
}

/// Everything the session transport needs to take over.
#[derive(Debug, Clone, Serialize)]
pub struct SessionHandoff {
    pub announcement: ServerAnnouncement,
    pub prediction: PredictionMode,
    pub predict_overwrite: bool,
    pub term_size: Option<TermSize>,
}

impl SessionHandoff {
    pub fn new(
        announcement: ServerAnnouncement,
        params: &ClientParameters,
        term_size: Option<TermSize>,
    ) -> Self {
        Self {
            announcement,
            prediction: params.prediction(),
            predict_overwrite: params.predict_overwrite(),
            term_size,
        }
    }

    /// Environment for `mosh-client`.
    pub fn client_env(&self) -> Vec<(&'static str, String)> {
        let mut env = vec![
            ("MOSH_KEY", self.announcement.key.to_base64()),
            ("MOSH_PREDICTION_DISPLAY", self.prediction.to_string()),
        ];
        if self.predict_overwrite {
            env.push(("MOSH_PREDICTION_OVERWRITE", "yes".to_string()));
        }
        env
    }
}

/// Consumer of a finished negotiation.
#[async_trait]
pub trait SessionTransport: Send + Sync {
    /// Run the session to completion and return its exit code.
    async fn run(&self, handoff: SessionHandoff) -> Result<i32>;
}
