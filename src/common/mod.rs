// 导出共享模块
pub mod api;
pub mod config;
pub mod context;
pub mod error;
pub mod logging_setup;
pub mod models;
pub mod websocket;

// 重新导出常用类型，方便使用
pub use api::BinanceApi;
pub use config::FilterConfig;
pub use context::spawn_instrumented;
pub use error::{AppError, Result};
pub use models::{
    CombinedStreamPayload, ExchangeInfo, MarkPriceEvent, SymbolCatalog, SymbolInfo, TickerEvent, TradeEvent,
};
