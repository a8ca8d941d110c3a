mod address;
mod portfolio;
mod record;
mod supply;

pub use address::{AddressError, EvmAddress};
pub use portfolio::{LegSide, PortfolioSnapshot, Position, TokenLeg, WalletPosition};
pub use record::{
    Breakdown, LineItem, NavRecord, Omission, PositionTotal, PositionValuation, PriceOrigin,
    ReferenceAsset, UnresolvedPricePolicy,
};
pub use supply::VaultShareSupply;
