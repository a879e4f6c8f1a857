//! Deployment errors.

use alloy::{contract, dyn_abi, providers::PendingTransactionError, transports::TransportError};
use thiserror::Error;

use crate::solc::CompilerError;

/// Everything that can go wrong in [`Deployer::deploy`](crate::Deployer::deploy).
///
/// All failures are terminal for the current call; nothing is retried or
/// swallowed internally.
#[derive(Debug, Error)]
pub enum DeployError {
    /// The `solc` subprocess could not be run or its output understood.
    #[error(transparent)]
    Compiler(CompilerError),
    /// The source bundle failed to compile; carries the first error
    /// message reported by the compiler.
    #[error("compilation failed: {0}")]
    Compilation(String),
    /// The requested contract is not part of the compiled bundle.
    #[error("invalid contract name '{name}', available contracts: {available}")]
    InvalidContractName { name: String, available: String },
    /// The contract has no creation bytecode (interface or abstract contract).
    #[error("contract '{0}' has no creation bytecode")]
    MissingBytecode(String),
    /// Constructor argument encoding failed.
    #[error("constructor arguments do not match the contract ABI: {0}")]
    Constructor(#[from] dyn_abi::Error),
    /// Constructor arguments were supplied to a contract without a constructor.
    #[error("contract has no constructor, but {0} constructor arguments were supplied")]
    UnexpectedArguments(usize),
    /// Contract-level client failure, including a mined creation
    /// transaction without a contract address.
    #[error(transparent)]
    Client(#[from] contract::Error),
    /// RPC or transport failure reported by the chain client.
    #[error(transparent)]
    Rpc(#[from] TransportError),
    /// Failure while waiting for the creation transaction to be mined.
    #[error(transparent)]
    Pending(#[from] PendingTransactionError),
}

impl From<CompilerError> for DeployError {
    fn from(err: CompilerError) -> Self {
        match err {
            CompilerError::Source(message) => Self::Compilation(message),
            other => Self::Compiler(other),
        }
    }
}
