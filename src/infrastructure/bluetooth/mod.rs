//! Bluetooth Module
//!
//! BLE adapter bring-up, discovery, and a single managed connection that
//! recovers on its own after transient loss.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                    BluetoothService                       │
//! │  (single cooperative task: commands, transport, timers)   │
//! └────────┬───────────────┬────────────────────┬────────────┘
//!          │               │                    │
//!          ▼               ▼                    ▼
//! ┌────────────────┐ ┌─────────────┐ ┌────────────────────┐
//! │ AdapterMonitor │ │ ScanSession │ │ ConnectionManager  │◀── LifecycleBridge
//! │ - bring-up     │ │ - dedup     │ │ - state machine    │
//! │ - availability │ │ - timeout   │ │ - ReconnectionPolicy│
//! └────────────────┘ └─────────────┘ └────────────────────┘
//!          │               │                    │
//!          └───────────────┴──── BleBackend ────┘
//!                     (simulated / WinRT)
//! ```
//!
//! ## Modules
//!
//! - [`backend`] - Platform seam and transport events
//! - [`adapter`] - Adapter initialization
//! - [`scanner`] - Time-boxed discovery
//! - [`connection`] - Connection state machine
//! - [`reconnection`] - Exponential backoff policy
//! - [`lifecycle`] - App foreground / background notifications
//! - [`service`] - Main service coordinator

pub mod adapter;
pub mod backend;
pub mod connection;
pub mod lifecycle;
pub mod notifier;
pub mod reconnection;
pub mod scanner;
pub mod service;
pub mod simulated;
pub mod subscription;
pub mod timer;
#[cfg(windows)]
pub mod winrt;

// Re-export main service for convenience
pub use service::{BluetoothConfig, BluetoothService};
