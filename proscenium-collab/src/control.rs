//! Exclusive edit-control lease with a FIFO waiting queue.
//!
//! ```text
//!            request_control                 request_control(owner)
//!  UNOWNED ──────────────────► OWNED(o, t) ◄──────────────────────┐
//!     ▲                          │  │                              │
//!     │ release / expire,        │  └──────────────────────────────┘
//!     │ no connected waiter      │ release / expire,
//!     └──────────────────────────┤ next connected waiter w
//!                                ▼
//!                          OWNED(w, now + ttl)
//! ```
//!
//! Expiry is evaluated lazily whenever the lease is touched. There is no
//! background sweep, so an idle room can report a stale owner until its
//! next access.

use serde::Serialize;
use std::collections::VecDeque;

use crate::config::{valid_ttl, DEFAULT_CONTROL_TTL_SECS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlMode {
    /// One client holds the lease.
    Exclusive,
    /// Nobody holds it.
    Open,
}

/// Current lease as reported in presence snapshots.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControlState {
    pub owner: Option<String>,
    pub expires: Option<f64>,
    pub queue: Vec<String>,
    pub mode: ControlMode,
}

/// Answer to a control request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ControlResponse {
    Granted { owner: String, expires: f64 },
    /// `position` is 1-based.
    Queued { owner: String, position: usize },
}

impl ControlResponse {
    pub fn is_granted(&self) -> bool {
        matches!(self, ControlResponse::Granted { .. })
    }

    pub fn owner(&self) -> &str {
        match self {
            ControlResponse::Granted { owner, .. } | ControlResponse::Queued { owner, .. } => owner,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ControlLease {
    owner: Option<String>,
    expires: f64,
    queue: VecDeque<String>,
    default_ttl: f64,
}

impl ControlLease {
    pub fn new(default_ttl: f64) -> Self {
        Self {
            owner: None,
            expires: 0.0,
            queue: VecDeque::new(),
            default_ttl: valid_ttl(Some(default_ttl)).unwrap_or(DEFAULT_CONTROL_TTL_SECS),
        }
    }

    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    pub fn default_ttl(&self) -> f64 {
        self.default_ttl
    }

    pub fn is_queued(&self, client_id: &str) -> bool {
        self.queue.iter().any(|queued| queued == client_id)
    }

    /// Drop an expired lease, promoting the next connected waiter. Returns
    /// whether the owner changed.
    pub fn expire(&mut self, now: f64, is_connected: impl Fn(&str) -> bool) -> bool {
        let Some(owner) = self.owner.as_deref() else {
            return false;
        };
        if now < self.expires {
            return false;
        }
        log::debug!("Control lease of {owner} expired");
        self.promote(now, is_connected);
        true
    }

    /// Grant or extend the lease for `client_id`, or queue it behind the
    /// current owner. Invalid `ttl` values fall back to the default.
    pub fn request(
        &mut self,
        client_id: &str,
        ttl: Option<f64>,
        now: f64,
        is_connected: impl Fn(&str) -> bool,
    ) -> ControlResponse {
        self.expire(now, is_connected);
        let ttl = valid_ttl(ttl).unwrap_or(self.default_ttl);

        match self.owner.clone() {
            Some(owner) if owner != client_id => {
                if !self.is_queued(client_id) {
                    self.queue.push_back(client_id.to_string());
                }
                let position = self
                    .queue
                    .iter()
                    .position(|queued| queued == client_id)
                    .map_or(self.queue.len(), |index| index + 1);
                ControlResponse::Queued { owner, position }
            }
            _ => self.grant(client_id, ttl, now),
        }
    }

    /// Give up the lease or a queue slot. Returns whether anything changed.
    pub fn release(&mut self, client_id: &str, now: f64, is_connected: impl Fn(&str) -> bool) -> bool {
        let expired = self.expire(now, &is_connected);

        if self.owner.as_deref() == Some(client_id) {
            self.promote(now, is_connected);
            return true;
        }
        let queued = self.queue.len();
        self.queue.retain(|queued| queued != client_id);
        expired || self.queue.len() != queued
    }

    pub fn state(&self) -> ControlState {
        ControlState {
            owner: self.owner.clone(),
            expires: self.owner.as_ref().map(|_| self.expires),
            queue: self.queue.iter().cloned().collect(),
            mode: if self.owner.is_some() {
                ControlMode::Exclusive
            } else {
                ControlMode::Open
            },
        }
    }

    fn grant(&mut self, client_id: &str, ttl: f64, now: f64) -> ControlResponse {
        self.queue.retain(|queued| queued != client_id);
        self.owner = Some(client_id.to_string());
        self.expires = now + ttl;
        ControlResponse::Granted {
            owner: client_id.to_string(),
            expires: self.expires,
        }
    }

    fn promote(&mut self, now: f64, is_connected: impl Fn(&str) -> bool) {
        self.owner = None;
        self.expires = 0.0;
        while let Some(next) = self.queue.pop_front() {
            if is_connected(&next) {
                log::debug!("Control passed to {next}");
                self.grant(&next, self.default_ttl, now);
                return;
            }
        }
    }
}
