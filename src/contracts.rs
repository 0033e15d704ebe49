// src/contracts.rs
#![allow(clippy::too_many_arguments)]

use ethers::prelude::abigen;

// EntryPoint v0.6 (eth-infinitism). Only the calls this crate makes.
abigen!(
    IEntryPoint,
    r#"[
        function getNonce(address sender, uint192 key) external view returns (uint256 nonce)
        function deposits(address account) external view returns (uint112 deposit, bool staked, uint112 stake, uint32 unstakeDelaySec, uint48 withdrawTime)
        function addStake(uint32 unstakeDelaySec) external payable
        function unlockStake() external
        function withdrawStake(address withdrawAddress) external
        function depositTo(address account) external payable
    ]"#
);

abigen!(
    IPaymaster,
    r#"[
        struct UserOperation { address sender; uint256 nonce; bytes initCode; bytes callData; uint256 callGasLimit; uint256 verificationGasLimit; uint256 preVerificationGas; uint256 maxFeePerGas; uint256 maxPriorityFeePerGas; bytes paymasterAndData; bytes signature; }
        function validatePaymasterUserOp(UserOperation userOp, bytes32 userOpHash, uint256 maxCost) external returns (bytes context, uint256 validationData)
        function postOp(uint8 mode, bytes context, uint256 actualGasCost) external
    ]"#
);

abigen!(
    IERC20,
    r#"[
        function balanceOf(address account) external view returns (uint256)
        function allowance(address owner, address spender) external view returns (uint256)
    ]"#
);

// Sponsor wallet contract behind the relayer.
abigen!(
    AdWalletSponsor,
    r#"[
        function nonces(address user) external view returns (uint256)
        function executeSponsoredTransfer(address token, address from, address to, uint256 amount, uint256 nonce, bytes signature) external returns (bool)
    ]"#
);

impl From<crate::types::UserOperation> for UserOperation {
    fn from(op: crate::types::UserOperation) -> Self {
        Self {
            sender: op.sender,
            nonce: op.nonce,
            init_code: op.init_code,
            call_data: op.call_data,
            call_gas_limit: op.call_gas_limit,
            verification_gas_limit: op.verification_gas_limit,
            pre_verification_gas: op.pre_verification_gas,
            max_fee_per_gas: op.max_fee_per_gas,
            max_priority_fee_per_gas: op.max_priority_fee_per_gas,
            paymaster_and_data: op.paymaster_and_data,
            signature: op.signature,
        }
    }
}
