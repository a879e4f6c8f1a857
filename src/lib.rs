//! Solidity compile-and-deploy helper.
//!
//! Compiles a source bundle with an external `solc` binary and deploys
//! named contracts through an alloy provider.
//!
//! ```no_run
//! use sol_deployer::{DeployOptions, Deployer, provider};
//!
//! async fn example() -> anyhow::Result<()> {
//!     let provider = provider::build_provider(
//!         "test test test test test test test test test test test junk".to_string(),
//!         0,
//!         "http://localhost:8545".parse()?,
//!     )?;
//!     let deployer = Deployer::new(
//!         provider,
//!         "contract Foo { function foo() public pure returns (uint256) { return 42; } }",
//!         false,
//!     );
//!     let foo = deployer.deploy("Foo", &[], DeployOptions::default()).await?;
//!     println!("deployed at {:#x}", foo.address());
//!     Ok(())
//! }
//! ```

mod deployer;
mod error;
mod solc;

pub mod provider;

pub use deployer::{DeployOptions, DeployedContract, Deployer};
pub use error::DeployError;
pub use solc::{Compilation, Compiler, CompilerError, ContractArtifact, SourceBundle};
