use alloy::sol;

// ─── ERC20 Factory ──────────────────────────────────────────────────────────
sol! {
    #[allow(missing_docs)]
    #[derive(Debug, PartialEq, Eq)]
    contract ERC20Factory {
        event TokenDeployed(address indexed owner, address indexed token);

        function getOwnerTokens(address owner) external view returns (address[] memory);
        function createToken(
            string name,
            string symbol,
            uint8 decimals,
            uint256 initialSupply,
            bool mintable
        ) external returns (address token);
    }
}

// ─── Deployed Token (ERC20 + ownable + mintable + burnable) ─────────────────
sol! {
    #[allow(missing_docs)]
    #[derive(Debug, PartialEq, Eq)]
    contract FactoryToken {
        // === ERC-20 core events ===
        event Transfer(address indexed from, address indexed to, uint256 amount);
        event Approval(address indexed owner, address indexed spender, uint256 amount);

        // === Capability events ===
        event Minted(address indexed to, uint256 amount);
        event Burned(address indexed from, uint256 amount);

        // === ERC-20 view functions ===
        function name() external view returns (string memory);
        function symbol() external view returns (string memory);
        function decimals() external view returns (uint8);
        function totalSupply() external view returns (uint256);
        function balanceOf(address account) external view returns (uint256);

        // === Ownable ===
        function owner() external view returns (address);

        // === Capability flags ===
        function mintable() external view returns (bool);
        function burnable() external view returns (bool);

        // === Capability writes ===
        function mint(address to, uint256 amount) external;
        function burn(uint256 amount) external;
    }
}
