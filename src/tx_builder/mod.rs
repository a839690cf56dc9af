//! Transaction building
//!
//! - **instructions**: per-action instruction plans and ordering validation
//! - **metadata_program**: token metadata program instructions
//! - **payment**: treasury address and the fee transfer
//! - **builder**: composition with the payment last and partial signing
//! - **output**: the composed transaction and its wire form
//! - **submit**: send, confirm, and rebuild after an expired blockhash

pub mod builder;
pub mod instructions;
pub mod metadata_program;
pub mod output;
pub mod payment;
pub mod submit;

pub use builder::compose;
pub use instructions::{sanity_check_ix_order, InstructionPlan, OperationStep};
pub use output::ComposedTransaction;
pub use payment::{build_payment_instruction, Treasury};
pub use submit::{SubmitPolicy, TransactionSubmitter};
