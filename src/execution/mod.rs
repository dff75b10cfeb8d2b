// Order lifecycle, fan-out and the poll loop
pub mod balance;
pub mod dispatcher;
pub mod lifecycle;
pub mod reconcile;
pub mod retry;
pub mod runner;

pub use balance::{BalanceFetch, BalanceMonitor, Balances};
pub use dispatcher::{ConcurrentDispatcher, DispatchError, Dispatched};
pub use lifecycle::{
    EvaluationError, OrderLifecycleEngine, PairState, PendingPlacement, PlacementKind, Transition,
};
pub use reconcile::{reconcile_bot, RecordWrite, ReconcileReport};
pub use retry::{Clock, ManualClock, RetryPolicy, TokioClock};
pub use runner::{BotRunner, LoadedBot, NewBot, RoundContext, RoundOutcome, RunExit};
