//! Compile-and-deploy orchestration.
//!
//! A [`Deployer`] owns a chain provider and a Solidity source bundle.
//! The bundle is compiled at most once per instance; each
//! [`deploy`](Deployer::deploy) call resolves a named contract from the
//! compiled artifacts, submits a creation transaction and returns a
//! [`DeployedContract`] handle once the receipt carries an address.

use std::sync::{Arc, Mutex};

use alloy::{
    contract::{ContractInstance, Interface},
    dyn_abi::{DynSolValue, JsonAbiExt},
    json_abi::JsonAbi,
    network::TransactionBuilder,
    primitives::{Address, Bytes, U256},
    providers::Provider,
    rpc::types::{TransactionReceipt, TransactionRequest},
};
use tracing::info;

use crate::{
    error::DeployError,
    solc::{Compilation, Compiler, SourceBundle},
};

/// Options merged into the submitted creation transaction.
///
/// All fields are optional; a provider with a wallet filler supplies the
/// sender and fee fields that are left unset. Caller-supplied values
/// always win over anything the deployer fills in.
#[derive(Debug, Clone, Default)]
pub struct DeployOptions {
    /// Sender address. May be omitted with a wallet-backed provider.
    pub from: Option<Address>,
    /// Explicit gas limit. Overrides gas estimation.
    pub gas: Option<u64>,
    /// Legacy gas price in wei.
    pub gas_price: Option<u128>,
    /// Ether value sent along with the creation.
    pub value: Option<U256>,
    /// Explicit sender nonce.
    pub nonce: Option<u64>,
    /// Ask the chain client to estimate gas for the creation calldata and
    /// use the estimate as the gas limit, unless `gas` is set.
    pub estimate_gas: bool,
}

/// Compiles a source bundle and deploys named contracts from it.
pub struct Deployer<P> {
    provider: P,
    sources: SourceBundle,
    optimize: bool,
    compiler: Compiler,
    // Populated by the first successful compile. A failed compile is not
    // cached, so a later call recompiles.
    compilation: Mutex<Option<Arc<Compilation>>>,
}

impl<P: Provider + Clone> Deployer<P> {
    /// New deployer over `provider` for the given source bundle, using
    /// the default `solc` executable.
    pub fn new(provider: P, sources: impl Into<SourceBundle>, optimize: bool) -> Self {
        Self {
            provider,
            sources: sources.into(),
            optimize,
            compiler: Compiler::default(),
            compilation: Mutex::new(None),
        }
    }

    /// Replace the compiler, e.g. to use a versioned `solc` binary.
    pub fn with_compiler(mut self, compiler: Compiler) -> Self {
        self.compiler = compiler;
        self
    }

    /// Compile the bundle if no cached compilation exists yet.
    ///
    /// Concurrent callers serialize on the guard, so the bundle is
    /// compiled exactly once per instance.
    fn compilation(&self) -> Result<Arc<Compilation>, DeployError> {
        let mut guard = match self.compilation.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(compilation) = guard.as_ref() {
            return Ok(compilation.clone());
        }
        let compilation = Arc::new(self.compiler.compile(&self.sources, self.optimize)?);
        *guard = Some(compilation.clone());
        Ok(compilation)
    }

    /// Deploy the named contract with the given constructor arguments.
    ///
    /// Succeeds only once the creation transaction is mined into a
    /// receipt carrying a contract address.
    pub async fn deploy(
        &self,
        name: &str,
        args: &[DynSolValue],
        opts: DeployOptions,
    ) -> Result<DeployedContract<P>, DeployError> {
        let compilation = self.compilation()?;
        let Some(artifact) = compilation.contracts.get(name) else {
            return Err(DeployError::InvalidContractName {
                name: name.to_string(),
                available: compilation.contract_names().collect::<Vec<_>>().join(", "),
            });
        };
        if artifact.bytecode.is_empty() {
            return Err(DeployError::MissingBytecode(name.to_string()));
        }

        let data = constructor_calldata(&artifact.abi, &artifact.bytecode, args)?;

        let mut tx = TransactionRequest::default().with_deploy_code(data);
        if let Some(from) = opts.from {
            tx = tx.with_from(from);
        }
        if let Some(value) = opts.value {
            tx = tx.with_value(value);
        }
        if let Some(nonce) = opts.nonce {
            tx = tx.with_nonce(nonce);
        }
        if let Some(gas_price) = opts.gas_price {
            tx = tx.with_gas_price(gas_price);
        }
        match opts.gas {
            Some(gas) => tx = tx.with_gas_limit(gas),
            None if opts.estimate_gas => {
                let estimated = self.provider.estimate_gas(tx.clone()).await?;
                info!(%estimated, "estimated deployment gas");
                tx = tx.with_gas_limit(estimated);
            }
            None => {}
        }

        info!("deploying {name}");
        let pending = self.provider.send_transaction(tx).await?;
        let tx_hash = *pending.tx_hash();
        info!(%tx_hash, "waiting for tx to be mined");

        let receipt = pending.get_receipt().await?;
        info!(%receipt.gas_used, %tx_hash, "tx mined");
        let address = receipt
            .contract_address
            .ok_or(alloy::contract::Error::ContractNotDeployed)?;

        info!("deployed {name} at {address:#x}");
        Ok(DeployedContract::new(
            address,
            artifact.abi.clone(),
            self.provider.clone(),
        ))
    }
}

fn constructor_calldata(
    abi: &JsonAbi,
    bytecode: &Bytes,
    args: &[DynSolValue],
) -> Result<Bytes, DeployError> {
    let encoded = match abi.constructor() {
        Some(constructor) => constructor.abi_encode_input(args)?,
        None if args.is_empty() => Vec::new(),
        None => return Err(DeployError::UnexpectedArguments(args.len())),
    };
    let mut data = bytecode.to_vec();
    data.extend_from_slice(&encoded);
    Ok(data.into())
}

/// Handle to a deployed contract, bound to its address and ABI.
///
/// Thin wrapper over alloy's dynamic [`ContractInstance`]: the
/// [`call`](Self::call) and [`send`](Self::send) helpers cover the common
/// cases, [`instance`](Self::instance) exposes the full call-builder API.
#[derive(Debug)]
pub struct DeployedContract<P> {
    address: Address,
    abi: JsonAbi,
    instance: ContractInstance<P>,
}

impl<P: Provider + Clone> DeployedContract<P> {
    fn new(address: Address, abi: JsonAbi, provider: P) -> Self {
        let instance = ContractInstance::new(address, provider, Interface::new(abi.clone()));
        Self {
            address,
            abi,
            instance,
        }
    }

    /// The deployed contract address.
    pub fn address(&self) -> Address {
        self.address
    }

    /// The contract ABI the handle is bound to.
    pub fn abi(&self) -> &JsonAbi {
        &self.abi
    }

    /// The underlying dynamic contract instance.
    pub fn instance(&self) -> &ContractInstance<P> {
        &self.instance
    }

    /// Read-only call of `method`, returning the decoded outputs.
    pub async fn call(
        &self,
        method: &str,
        args: &[DynSolValue],
    ) -> Result<Vec<DynSolValue>, DeployError> {
        Ok(self.instance.function(method, args)?.call().await?)
    }

    /// Submit a state-mutating call of `method` and wait for its receipt.
    pub async fn send(
        &self,
        method: &str,
        args: &[DynSolValue],
    ) -> Result<TransactionReceipt, DeployError> {
        Ok(self
            .instance
            .function(method, args)?
            .send()
            .await?
            .get_receipt()
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use alloy::{
        node_bindings::Anvil,
        providers::{Provider, ProviderBuilder, WalletProvider},
    };

    use super::*;
    use crate::provider::build_provider;

    const FOO_SOL: &str = r#"
        // SPDX-License-Identifier: MIT
        pragma solidity ^0.8.0;

        contract Foo {
            uint256 public x;

            function foo() public pure returns (uint256) {
                return 42;
            }

            function setX(uint256 value) public {
                x = value;
            }
        }
    "#;

    const BAR_SOL: &str = r#"
        // SPDX-License-Identifier: MIT
        pragma solidity ^0.8.0;

        contract Bar {
            uint256 public initial;

            constructor(uint256 value) payable {
                initial = value;
            }
        }
    "#;

    const ANVIL_MNEMONIC: &str = "test test test test test test test test test test test junk";

    fn test_bundle() -> SourceBundle {
        SourceBundle::Files(BTreeMap::from([
            ("Foo.sol".to_string(), FOO_SOL.to_string()),
            ("Bar.sol".to_string(), BAR_SOL.to_string()),
        ]))
    }

    #[tokio::test]
    async fn deploys_contract() -> anyhow::Result<()> {
        let provider = ProviderBuilder::new().connect_anvil_with_wallet();
        let sender = provider.default_signer_address();
        let deployer = Deployer::new(provider.clone(), test_bundle(), false);

        let opts = DeployOptions {
            from: Some(sender),
            ..Default::default()
        };
        let foo = deployer.deploy("Foo", &[], opts).await?;
        assert_ne!(foo.address(), Address::ZERO);

        let code = provider.get_code_at(foo.address()).await?;
        assert!(!code.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn rejects_unknown_contract_name() {
        let provider = ProviderBuilder::new().connect_anvil_with_wallet();
        let sender = provider.default_signer_address();
        let deployer = Deployer::new(provider.clone(), test_bundle(), false);

        let err = deployer
            .deploy("Faa", &[], DeployOptions::default())
            .await
            .unwrap_err();
        match err {
            DeployError::InvalidContractName { name, available } => {
                assert_eq!(name, "Faa");
                assert_eq!(available, "Bar, Foo");
            }
            other => panic!("unexpected error: {other}"),
        }

        // no transaction was submitted
        assert_eq!(provider.get_transaction_count(sender).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn rejects_invalid_source() {
        let provider = ProviderBuilder::new().connect_anvil_with_wallet();
        let sender = provider.default_signer_address();
        let deployer = Deployer::new(
            provider.clone(),
            "pragma solidity ^0.8.0;\ncontracts A {}",
            false,
        );

        let err = deployer
            .deploy("A", &[], DeployOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::Compilation(_)));
        assert_eq!(provider.get_transaction_count(sender).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn rejects_interface_without_bytecode() {
        let provider = ProviderBuilder::new().connect_anvil_with_wallet();
        let sender = provider.default_signer_address();
        let deployer = Deployer::new(
            provider.clone(),
            "// SPDX-License-Identifier: MIT\n\
             pragma solidity ^0.8.0;\n\
             interface IFoo { function foo() external returns (uint256); }",
            false,
        );

        let err = deployer
            .deploy("IFoo", &[], DeployOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::MissingBytecode(name) if name == "IFoo"));
        assert_eq!(provider.get_transaction_count(sender).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn compiles_once_per_instance() {
        let provider = ProviderBuilder::new().connect_anvil_with_wallet();
        let deployer = Deployer::new(provider, test_bundle(), false);

        let first = deployer.compilation().unwrap();
        let second = deployer.compilation().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn failed_compilation_is_not_cached() {
        let provider = ProviderBuilder::new().connect_anvil_with_wallet();
        let deployer = Deployer::new(provider, "contracts A {}", false);

        assert!(deployer.compilation().is_err());
        assert!(deployer.compilation.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn passes_constructor_arguments_and_value() {
        let provider = ProviderBuilder::new().connect_anvil_with_wallet();
        let deployer = Deployer::new(provider, test_bundle(), false);

        let opts = DeployOptions {
            value: Some(U256::from(1_000u64)),
            ..Default::default()
        };
        let bar = deployer
            .deploy("Bar", &[DynSolValue::Uint(U256::from(7u64), 256)], opts)
            .await
            .unwrap();

        let stored = bar.call("initial", &[]).await.unwrap();
        assert_eq!(stored, vec![DynSolValue::Uint(U256::from(7u64), 256)]);
    }

    #[tokio::test]
    async fn rejects_unexpected_constructor_arguments() {
        let provider = ProviderBuilder::new().connect_anvil_with_wallet();
        let deployer = Deployer::new(provider, test_bundle(), false);

        let err = deployer
            .deploy(
                "Foo",
                &[DynSolValue::Uint(U256::from(1u64), 256)],
                DeployOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::UnexpectedArguments(1)));
    }

    #[tokio::test]
    async fn estimates_gas_when_enabled() {
        let provider = ProviderBuilder::new().connect_anvil_with_wallet();
        let deployer = Deployer::new(provider, test_bundle(), false);

        let opts = DeployOptions {
            estimate_gas: true,
            ..Default::default()
        };
        let foo = deployer.deploy("Foo", &[], opts).await.unwrap();
        assert_ne!(foo.address(), Address::ZERO);
    }

    #[tokio::test]
    async fn handle_methods_agree() {
        let provider = ProviderBuilder::new().connect_anvil_with_wallet();
        let deployer = Deployer::new(provider, test_bundle(), false);
        let foo = deployer
            .deploy("Foo", &[], DeployOptions::default())
            .await
            .unwrap();

        let via_helper = foo.call("foo", &[]).await.unwrap();
        let via_instance = foo
            .instance()
            .function("foo", &[])
            .unwrap()
            .call()
            .await
            .unwrap();
        assert_eq!(via_helper, via_instance);

        foo.send("setX", &[DynSolValue::Uint(U256::from(5u64), 256)])
            .await
            .unwrap();
        assert_eq!(
            foo.call("x", &[]).await.unwrap(),
            vec![DynSolValue::Uint(U256::from(5u64), 256)]
        );
    }

    #[tokio::test]
    async fn mnemonic_provider_deploys() -> anyhow::Result<()> {
        let anvil = Anvil::new().spawn();
        let provider = build_provider(ANVIL_MNEMONIC.to_string(), 0, anvil.endpoint_url())?;
        let deployer = Deployer::new(provider, FOO_SOL, false);

        let foo = deployer.deploy("Foo", &[], DeployOptions::default()).await?;
        assert_ne!(foo.address(), Address::ZERO);
        Ok(())
    }
}
