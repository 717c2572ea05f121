//! Actor-based runner supervision
//!
//! Every target runs in its own task and talks to the rest of the system
//! through Tokio channels only.
//!
//! ## Architecture Overview
//!
//! ```text
//!                    ┌─────────────────┐
//!                    │ probewatch main │
//!                    └────────┬────────┘
//!                             │ SupervisorHandle
//!                    ┌────────▼────────┐
//!                    │ SupervisorActor │◄──── RunnerEvent (mpsc)
//!                    └────────┬────────┘          ▲
//!                             │ spawns            │
//!                ┌────────────┼────────────┐      │
//!        ┌───────▼───────┐         ┌───────▼───────┐
//!        │ TargetRunner  │   ...   │ TargetRunner  │
//!        │  (router)     │         │  (wan)        │
//!        └───────┬───────┘         └───────┬───────┘
//!                │ probe → evaluate → dispatch
//!                ▼                         ▼
//!             Dispatcher (shared notifier transport)
//! ```
//!
//! ## Communication Patterns
//!
//! 1. **Commands**: the supervisor has an mpsc command channel (status, shutdown)
//! 2. **Events**: runners report every tick to the supervisor over mpsc
//! 3. **Shutdown**: a single `watch` flag observed by every runner
//! 4. **Request/Response**: oneshot channels for status queries

pub mod messages;
pub mod runner;
pub mod supervisor;
