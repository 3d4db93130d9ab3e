//! SIMT reconvergence mechanisms for CTA emulation
//!
//! This crate provides:
//! - **Execution contexts**: lane groups sharing a program counter
//! - **Context stack**: ordered contexts with lane-partition auditing
//! - **Mechanism contract**: [`ReconvergenceMechanism`] and its factory
//! - **Mechanisms**: IPDOM, Barrier, TFGen6 and TFSortedStack
//! - **CTA driver**: [`CooperativeThreadArray`] and [`launch_grid`]
//! - **Translation cache**: compiled subkernels per warp size
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │        launch_grid (rayon, one task/CTA)      │
//! └──────────────────────┬───────────────────────┘
//!                        ▼
//! ┌──────────────────────────────────────────────┐
//! │  CooperativeThreadArray: fetch, ALU, dispatch │
//! └──────────────────────┬───────────────────────┘
//!                        ▼
//! ┌──────────────────────────────────────────────┐
//! │      Box<dyn ReconvergenceMechanism>          │
//! └──────┬──────────┬──────────┬──────────┬──────┘
//!        ▼          ▼          ▼          ▼
//!     IPDOM     Barrier     TFGen6   TFSortedStack
//! ```
//!
//! # Usage
//!
//! ```rust
//! use simt_reconverge::{
//!     CooperativeThreadArray, Condition, EmulatorConfig, Guard, Instruction, Kernel, LaneMask,
//!     MechanismType, Operand, Predicate,
//! };
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), simt_reconverge::ReconvergenceError> {
//! // p0 = lane < 2 ; @p0 bra 3 (ipdom 3) ; nop ; exit
//! let kernel = Arc::new(Kernel::new(
//!     "half",
//!     vec![
//!         Instruction::SETP { cond: Condition::LT, dst: Predicate::new(0), a: Operand::LaneId, b: Operand::Imm(2) },
//!         Instruction::branch(3, Guard::when(Predicate::new(0)), 3),
//!         Instruction::NOP,
//!         Instruction::exit(),
//!     ],
//! ));
//!
//! let report = CooperativeThreadArray::new(kernel, &EmulatorConfig::new(MechanismType::Ipdom, 4))?.run()?;
//! assert_eq!(report.divergent_branches, 1);
//! assert_eq!(report.trace.issues_at(3), vec![&LaneMask::full(4)]);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod context;
pub mod cta;
pub mod error;
pub mod grid;
pub mod isa;
pub mod lanes;
pub mod mask;
pub mod mechanism;
pub mod stack;
pub mod translation_cache;

pub use config::EmulatorConfig;
pub use context::ExecutionContext;
pub use cta::{CooperativeThreadArray, CtaReport, ExecutionTrace, TraceEvent};
pub use error::{ReconvergenceError, Result};
pub use grid::{launch_grid, launch_grid_with};
pub use isa::{Condition, Guard, Instruction, InstructionCategory, Kernel, Operand, Pc, Predicate, Register};
pub use lanes::{LaneFile, LaneState, PredicateFile};
pub use mask::LaneMask;
pub use mechanism::{
    create_mechanism, BarrierMechanism, IpdomMechanism, MechanismState, MechanismType, ReconvergenceMechanism,
    TfGen6Mechanism, TfSortedStackMechanism,
};
pub use stack::ContextStack;
pub use translation_cache::{SubkernelId, Translation, TranslationCache, TranslationKey};
