//! Per-instrument position state machine.
//!
//! One machine per instrument walks `Flat -> Entered -> Armed -> Flat`.
//! A tick feeds the machine the current price and it answers with at most
//! one [`Transition`], so a buy and a sell can never be emitted for the
//! same instrument in the same tick. The stop-loss branch is evaluated
//! before any take-profit branch, in every held state, every tick.

use crate::types::{Instrument, OrderIntent, Side, TradeReason};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

// =============================================================================
// Held Position
// =============================================================================

/// A position currently held. Exists only while the machine is in
/// `Entered` or `Armed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeldPosition {
    pub instrument: Instrument,
    pub buy_price: Decimal,
    /// Monotonically updated upward while the position is held.
    pub highest_price_seen: Decimal,
    pub entered_at: DateTime<Utc>,
}

impl HeldPosition {
    #[must_use]
    pub fn new(instrument: Instrument, buy_price: Decimal, entered_at: DateTime<Utc>) -> Self {
        Self {
            instrument,
            buy_price,
            highest_price_seen: buy_price,
            entered_at,
        }
    }

    /// Fractional return of `price` over the entry price.
    #[must_use]
    pub fn return_at(&self, price: Decimal) -> Decimal {
        if self.buy_price.is_zero() {
            return Decimal::ZERO;
        }
        (price - self.buy_price) / self.buy_price
    }
}

// =============================================================================
// Entry Thresholds
// =============================================================================

/// Momentum-mode entry/exit thresholds. Zeroed thresholds are neutral:
/// the machine ignores them until a qualifying spike sets both.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EntryThresholds {
    pub start_price: Decimal,
    pub profit_price: Decimal,
}

impl EntryThresholds {
    #[must_use]
    pub const fn new(start_price: Decimal, profit_price: Decimal) -> Self {
        Self {
            start_price,
            profit_price,
        }
    }

    #[must_use]
    pub fn neutral() -> Self {
        Self::default()
    }

    /// Both thresholds set and usable.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.start_price > Decimal::ZERO && self.profit_price > Decimal::ZERO
    }
}

// =============================================================================
// Policy
// =============================================================================

/// Exit parameters shared by all modes.
///
/// The fractional stop/take-profit are optional: momentum mode leans on
/// [`EntryThresholds`] instead, the multi-token scan uses the fractions.
/// Whichever is configured, the stop branch always runs first.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PositionPolicy {
    /// Exit when `(price - buy) / buy <= stop_loss_pct` (negative value).
    pub stop_loss_pct: Option<Decimal>,
    /// Arm trailing logic when `(price - buy) / buy >= take_profit_pct`.
    pub take_profit_pct: Option<Decimal>,
    /// Sell when the post-arming peak retraces by this fraction.
    pub trailing_giveback_pct: Decimal,
}

// =============================================================================
// State & Transition
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionState {
    Flat,
    Entered,
    /// Take-profit armed; trailing logic live.
    Armed,
}

/// Outcome of one tick. At most one order intent per transition.
#[derive(Debug, Clone)]
pub enum Transition {
    Entered(OrderIntent),
    StoppedOut(OrderIntent),
    Armed,
    TookProfit(OrderIntent),
    Hold,
}

impl Transition {
    /// The order this transition wants submitted, if any.
    #[must_use]
    pub fn intent(&self) -> Option<&OrderIntent> {
        match self {
            Self::Entered(intent) | Self::StoppedOut(intent) | Self::TookProfit(intent) => {
                Some(intent)
            }
            Self::Armed | Self::Hold => None,
        }
    }
}

/// Everything the machine needs to know about the current tick.
#[derive(Debug, Clone, Copy)]
pub struct TickContext {
    pub price: Decimal,
    /// Quantity a buy intent would request (sized by the caller).
    pub buy_quantity: Decimal,
    /// Quantity a sell intent would request (held balance).
    pub sell_quantity: Decimal,
    /// External entry trigger: qualifying spike/recovery already gated by
    /// thresholds being reachable, or an arbitrage buy leg.
    pub entry_signal: bool,
    pub timestamp: DateTime<Utc>,
}

// =============================================================================
// State Machine
// =============================================================================

#[derive(Debug, Clone)]
struct Snapshot {
    state: PositionState,
    position: Option<HeldPosition>,
    thresholds: EntryThresholds,
}

#[derive(Debug, Clone)]
pub struct PositionStateMachine {
    instrument: Instrument,
    policy: PositionPolicy,
    state: PositionState,
    position: Option<HeldPosition>,
    thresholds: EntryThresholds,
    undo: Option<Snapshot>,
}

impl PositionStateMachine {
    #[must_use]
    pub fn new(instrument: Instrument, policy: PositionPolicy) -> Self {
        Self {
            instrument,
            policy,
            state: PositionState::Flat,
            position: None,
            thresholds: EntryThresholds::neutral(),
            undo: None,
        }
    }

    #[must_use]
    pub fn state(&self) -> PositionState {
        self.state
    }

    #[must_use]
    pub fn position(&self) -> Option<&HeldPosition> {
        self.position.as_ref()
    }

    #[must_use]
    pub fn thresholds(&self) -> EntryThresholds {
        self.thresholds
    }

    #[must_use]
    pub fn instrument(&self) -> &Instrument {
        &self.instrument
    }

    /// Installs spike-derived thresholds. Only honored while flat with
    /// neutral thresholds, matching the one-shot arming of the source data.
    pub fn set_thresholds(&mut self, thresholds: EntryThresholds) -> bool {
        if self.state == PositionState::Flat && !self.thresholds.is_set() {
            debug!(
                instrument = %self.instrument,
                start_price = %thresholds.start_price,
                profit_price = %thresholds.profit_price,
                "Entry thresholds set"
            );
            self.thresholds = thresholds;
            true
        } else {
            false
        }
    }

    /// Overrides the trailing giveback, e.g. when a fluctuation band picks
    /// a wider retrace for a more volatile entry.
    pub fn set_trailing_giveback(&mut self, pct: Decimal) {
        self.policy.trailing_giveback_pct = pct;
    }

    /// Rehydrates a held position after a restart.
    pub fn restore(
        &mut self,
        position: HeldPosition,
        armed: bool,
        thresholds: EntryThresholds,
    ) {
        self.state = if armed {
            PositionState::Armed
        } else {
            PositionState::Entered
        };
        self.position = Some(position);
        self.thresholds = thresholds;
        self.undo = None;
    }

    /// Evaluates exactly one transition for this tick.
    ///
    /// Order-emitting transitions snapshot the prior state first; if the
    /// submission fails the caller invokes [`Self::rollback_last`] so the
    /// persisted state never records an unacknowledged fill.
    pub fn transition(&mut self, ctx: &TickContext) -> Transition {
        match self.state {
            PositionState::Flat => self.try_enter(ctx),
            PositionState::Entered | PositionState::Armed => self.try_exit(ctx),
        }
    }

    /// Restores the state captured before the last order-emitting
    /// transition. No-op if there is nothing to undo.
    pub fn rollback_last(&mut self) {
        if let Some(snapshot) = self.undo.take() {
            info!(
                instrument = %self.instrument,
                restored_state = ?snapshot.state,
                "Rolled back unacknowledged transition"
            );
            self.state = snapshot.state;
            self.position = snapshot.position;
            self.thresholds = snapshot.thresholds;
        }
    }

    /// Discards the undo snapshot once the order is acknowledged.
    pub fn commit_last(&mut self) {
        self.undo = None;
    }

    fn try_enter(&mut self, ctx: &TickContext) -> Transition {
        let threshold_cross = self.thresholds.is_set() && ctx.price > self.thresholds.start_price;
        if !(ctx.entry_signal || threshold_cross) {
            return Transition::Hold;
        }
        if ctx.buy_quantity <= Decimal::ZERO {
            debug!(instrument = %self.instrument, "Entry trigger with no buyable quantity");
            return Transition::Hold;
        }

        self.snapshot();
        self.state = PositionState::Entered;
        self.position = Some(HeldPosition::new(
            self.instrument.clone(),
            ctx.price,
            ctx.timestamp,
        ));
        info!(
            instrument = %self.instrument,
            price = %ctx.price,
            quantity = %ctx.buy_quantity,
            "Entering position"
        );
        Transition::Entered(self.intent(Side::Buy, ctx.buy_quantity, ctx, TradeReason::Entry))
    }

    fn try_exit(&mut self, ctx: &TickContext) -> Transition {
        // Stop-loss first, regardless of state or mode.
        if self.stop_hit(ctx.price) {
            return self.close(ctx, TradeReason::StopLoss);
        }

        if self.state == PositionState::Entered {
            if self.arm_hit(ctx.price) {
                self.state = PositionState::Armed;
                self.raise_watermark(ctx.price);
                info!(
                    instrument = %self.instrument,
                    price = %ctx.price,
                    "Take-profit armed, trailing exit live"
                );
                return Transition::Armed;
            }
            self.raise_watermark(ctx.price);
            return Transition::Hold;
        }

        // Armed: ratchet the peak, then check the giveback.
        self.raise_watermark(ctx.price);
        let highest = self
            .position
            .as_ref()
            .map_or(Decimal::ZERO, |p| p.highest_price_seen);
        if highest > Decimal::ZERO
            && (highest - ctx.price) / highest >= self.policy.trailing_giveback_pct
        {
            return self.close(ctx, TradeReason::TakeProfit);
        }
        Transition::Hold
    }

    fn close(&mut self, ctx: &TickContext, reason: TradeReason) -> Transition {
        if ctx.sell_quantity <= Decimal::ZERO {
            debug!(instrument = %self.instrument, %reason, "Exit trigger with no sellable quantity");
            return Transition::Hold;
        }
        self.snapshot();
        let intent = self.intent(Side::Sell, ctx.sell_quantity, ctx, reason);
        info!(
            instrument = %self.instrument,
            price = %ctx.price,
            quantity = %ctx.sell_quantity,
            %reason,
            "Exiting position"
        );
        self.state = PositionState::Flat;
        self.position = None;
        self.thresholds = EntryThresholds::neutral();
        match reason {
            TradeReason::StopLoss => Transition::StoppedOut(intent),
            _ => Transition::TookProfit(intent),
        }
    }

    fn stop_hit(&self, price: Decimal) -> bool {
        if self.thresholds.is_set() && price < self.thresholds.start_price {
            return true;
        }
        match (self.policy.stop_loss_pct, self.position.as_ref()) {
            (Some(stop), Some(pos)) => pos.return_at(price) <= stop,
            _ => false,
        }
    }

    fn arm_hit(&self, price: Decimal) -> bool {
        if self.thresholds.is_set() && price > self.thresholds.profit_price {
            return true;
        }
        match (self.policy.take_profit_pct, self.position.as_ref()) {
            (Some(target), Some(pos)) => pos.return_at(price) >= target,
            _ => false,
        }
    }

    fn raise_watermark(&mut self, price: Decimal) {
        if let Some(pos) = self.position.as_mut() {
            if price > pos.highest_price_seen {
                pos.highest_price_seen = price;
            }
        }
    }

    fn snapshot(&mut self) {
        self.undo = Some(Snapshot {
            state: self.state,
            position: self.position.clone(),
            thresholds: self.thresholds,
        });
    }

    fn intent(
        &self,
        side: Side,
        quantity: Decimal,
        ctx: &TickContext,
        reason: TradeReason,
    ) -> OrderIntent {
        OrderIntent {
            instrument: self.instrument.clone(),
            side,
            quantity,
            price: ctx.price,
            reason,
            timestamp: ctx.timestamp,
        }
    }
}

// =============================================================================
// Position Book
// =============================================================================

/// All machines the engine drives, keyed by instrument.
#[derive(Debug, Clone)]
pub struct PositionBook {
    policy: PositionPolicy,
    machines: std::collections::HashMap<Instrument, PositionStateMachine>,
}

impl PositionBook {
    #[must_use]
    pub fn new(policy: PositionPolicy) -> Self {
        Self {
            policy,
            machines: std::collections::HashMap::new(),
        }
    }

    /// The machine for `instrument`, created flat on first use.
    pub fn machine(&mut self, instrument: &Instrument) -> &mut PositionStateMachine {
        let policy = self.policy;
        self.machines
            .entry(instrument.clone())
            .or_insert_with(|| PositionStateMachine::new(instrument.clone(), policy))
    }

    #[must_use]
    pub fn get(&self, instrument: &Instrument) -> Option<&PositionStateMachine> {
        self.machines.get(instrument)
    }

    /// Machines currently holding a position.
    pub fn held(&self) -> impl Iterator<Item = &PositionStateMachine> {
        self.machines
            .values()
            .filter(|m| m.state() != PositionState::Flat)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PositionStateMachine> {
        self.machines.values()
    }
}
