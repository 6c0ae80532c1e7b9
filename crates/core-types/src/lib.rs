pub mod enums;
pub mod error;
pub mod pagination;
pub mod structs;

// Re-export the core types to provide a clean public API.
pub use enums::{CoinSort, SortOrder, TradeSide};
pub use error::CoreError;
pub use pagination::{CoinOrdering, Page, PageRequest};
pub use structs::{
    Coin, CoinPriceUpdate, Holding, HoldingWithCoin, MarketSummary, NewCoin, NewTrade, NewUser,
    Position, Trade, TradeWithCoin, User, WatchlistEntry, WatchlistItem,
};
