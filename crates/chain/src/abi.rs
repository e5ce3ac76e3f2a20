use alloy::sol;

// ─── Loyalty Token Interface ────────────────────────────────────────────────
//
// The three balance-affecting events the ledger consumes. TokenMinted and
// TokenBurned carry an on-chain timestamp in data; the ledger uses the block
// timestamp instead, so that field is decoded but ignored.
sol! {
    #[allow(missing_docs)]
    #[derive(Debug, PartialEq, Eq)]
    contract LoyaltyToken {
        event Transfer(address indexed from, address indexed to, uint256 value);
        event TokenMinted(address indexed to, uint256 amount, uint256 timestamp);
        event TokenBurned(address indexed from, uint256 amount, uint256 timestamp);
    }
}
