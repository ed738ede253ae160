pub mod chart;
pub mod error;
pub mod state;

pub use chart::buffer::{BufferNeeds, FetchDirection, FetchRequest, MergeDirection};
pub use chart::feed::SyntheticFeed;
pub use chart::indicator::{
    IndicatorCategory, IndicatorKind, IndicatorSettings, IndicatorSpec,
};
pub use chart::runtime::{run_chart_window, ChartCommand, ChartEvent, InitialFetchPlan};
pub use chart::store::{MergeOutcome, SequenceStore};
pub use chart::types::{
    decode_bar_batch, Bar, BarBatchDecode, ChartConfig, ChartFrame, ChartStatusSnapshot,
    ChartStreamState, ChartSubscriptionArgs, ChartSubscriptionSession, ChartTimeframe,
    IndicatorValue,
};
pub use chart::view::ViewWindow;
pub use chart::window::CandleWindowManager;
pub use error::ChartError;
pub use state::{ChartState, ChartSubscriptionHandle};
