//! Fixed-depth price-level order book
//!
//! Levels are kept best first (bids descending, asks ascending) in
//! fixed-capacity arrays. Prices are stored as integer multiples of the
//! book's tick exponent; a decoded price that cannot be rescaled exactly is
//! rejected.

use arrayvec::ArrayVec;
use thiserror::Error;

use crate::config::BookConfig;
use crate::field::Decimal;

pub const MAX_BOOK_DEPTH: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Bid,
    Ask,
}

/// `MDEntryType`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    Bid,
    Offer,
    EmptyBook,
}

impl EntryType {
    pub fn from_bytes(value: &[u8]) -> Option<Self> {
        match value {
            b"0" => Some(EntryType::Bid),
            b"1" => Some(EntryType::Offer),
            b"J" => Some(EntryType::EmptyBook),
            _ => None,
        }
    }

    pub fn side(self) -> Option<Side> {
        match self {
            EntryType::Bid => Some(Side::Bid),
            EntryType::Offer => Some(Side::Ask),
            EntryType::EmptyBook => None,
        }
    }
}

/// `MDUpdateAction`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateAction {
    New,
    Change,
    Delete,
}

impl UpdateAction {
    pub fn from_u64(v: u64) -> Option<Self> {
        match v {
            0 => Some(UpdateAction::New),
            1 => Some(UpdateAction::Change),
            2 => Some(UpdateAction::Delete),
            _ => None,
        }
    }
}

/// One price level; `price` is in units of the tick exponent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceLevel {
    pub price: i64,
    pub size: i64,
}

/// One decoded market-data entry
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Entry {
    pub kind: EntryType,
    pub action: UpdateAction,
    pub price: Option<Decimal>,
    pub size: i64,
    /// Zero-based level index, when the feed addresses levels explicitly
    pub level: Option<usize>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BookError {
    #[error("price {price} is not a multiple of the tick")]
    OffTick { price: Decimal },

    #[error("level {level} out of range for depth {depth}")]
    LevelOutOfRange { level: usize, depth: usize },

    #[error("{side:?} level {level} holds price {found}, expected {expected}")]
    PriceMismatch {
        side: Side,
        level: usize,
        found: i64,
        expected: i64,
    },

    #[error("no {side:?} level at price {price}")]
    PriceNotFound { side: Side, price: i64 },

    #[error("missing field {0}")]
    MissingField(&'static str),

    #[error("invalid value in field {0}")]
    InvalidField(&'static str),
}

type Levels = ArrayVec<PriceLevel, MAX_BOOK_DEPTH>;

#[derive(Debug, Clone)]
pub struct Book {
    symbol: String,
    security_id: u64,
    tick: Decimal,
    trading_session: Option<String>,
    max_depth: usize,

    bids: Levels,
    asks: Levels,

    rptseq: u64,
    subscribed: bool,
    active: bool,
    empty: bool,
}

impl Book {
    pub fn new(symbol: impl Into<String>, security_id: u64, tick: Decimal, depth: usize) -> Self {
        Book {
            symbol: symbol.into(),
            security_id,
            tick,
            trading_session: None,
            max_depth: depth.clamp(1, MAX_BOOK_DEPTH),
            bids: ArrayVec::new(),
            asks: ArrayVec::new(),
            rptseq: 0,
            subscribed: false,
            active: false,
            empty: false,
        }
    }

    pub fn from_config(config: &BookConfig) -> Self {
        let mut book = Self::new(config.symbol.clone(), config.security_id, config.tick, config.depth);
        book.trading_session = config.trading_session.clone();
        book
    }

    /// Only accept entries tagged with this `TradingSessionID`
    pub fn with_trading_session(mut self, session: impl Into<String>) -> Self {
        self.trading_session = Some(session.into());
        self
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn security_id(&self) -> u64 {
        self.security_id
    }

    pub fn tick(&self) -> Decimal {
        self.tick
    }

    pub fn trading_session(&self) -> Option<&str> {
        self.trading_session.as_deref()
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn rptseq(&self) -> u64 {
        self.rptseq
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscribed
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Last entry applied was the empty-book marker
    pub fn is_empty(&self) -> bool {
        self.empty
    }

    pub(crate) fn set_rptseq(&mut self, rptseq: u64) {
        self.rptseq = rptseq;
    }

    pub(crate) fn set_subscribed(&mut self, subscribed: bool) {
        self.subscribed = subscribed;
    }

    pub(crate) fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    /// Whether an entry tagged with `session` belongs to this book
    pub fn accepts_session(&self, session: &[u8]) -> bool {
        match &self.trading_session {
            Some(own) => own.as_bytes() == session,
            None => true,
        }
    }

    pub fn levels(&self, side: Side) -> &[PriceLevel] {
        match side {
            Side::Bid => &self.bids,
            Side::Ask => &self.asks,
        }
    }

    fn levels_mut(&mut self, side: Side) -> &mut Levels {
        match side {
            Side::Bid => &mut self.bids,
            Side::Ask => &mut self.asks,
        }
    }

    /// Rescale `price` to the tick exponent. Fails unless the price is an
    /// exact multiple of the tick.
    pub fn price_in_ticks(&self, price: Decimal) -> Result<i64, BookError> {
        let mantissa = price
            .rescale(self.tick.exponent)
            .ok_or(BookError::OffTick { price })?;

        // a zero tick admits no price
        if mantissa.checked_rem(self.tick.mantissa) != Some(0) {
            return Err(BookError::OffTick { price });
        }
        Ok(mantissa)
    }

    pub fn to_price(&self, ticks: i64) -> Decimal {
        Decimal::new(ticks, self.tick.exponent)
    }

    /// Insert at `index`, shifting worse levels down. Levels pushed past
    /// the tracked depth are dropped.
    pub fn new_level(&mut self, side: Side, index: usize, level: PriceLevel) -> Result<(), BookError> {
        let depth = self.max_depth;
        if index >= depth {
            return Ok(());
        }

        let levels = self.levels_mut(side);
        if index > levels.len() {
            return Err(BookError::LevelOutOfRange { level: index, depth: levels.len() });
        }
        if levels.len() >= depth {
            levels.truncate(depth - 1);
        }
        levels.insert(index, level);
        Ok(())
    }

    pub fn change_level(&mut self, side: Side, index: usize, level: PriceLevel) -> Result<(), BookError> {
        if index >= self.max_depth {
            return Ok(());
        }

        let slot = self.level_at(side, index, Some(level.price))?;
        slot.size = level.size;
        Ok(())
    }

    /// Remove the level at `index`; `price`, when known, must match.
    pub fn delete_level(&mut self, side: Side, index: usize, price: Option<i64>) -> Result<(), BookError> {
        if index >= self.max_depth {
            return Ok(());
        }

        self.level_at(side, index, price)?;
        self.levels_mut(side).remove(index);
        Ok(())
    }

    fn level_at(&mut self, side: Side, index: usize, price: Option<i64>) -> Result<&mut PriceLevel, BookError> {
        let levels = self.levels_mut(side);
        let len = levels.len();
        let slot = levels
            .get_mut(index)
            .ok_or(BookError::LevelOutOfRange { level: index, depth: len })?;

        match price {
            Some(expected) if slot.price != expected => Err(BookError::PriceMismatch {
                side,
                level: index,
                found: slot.price,
                expected,
            }),
            _ => Ok(slot),
        }
    }

    /// Index of `price` on `side`, or where it would be inserted
    fn locate(&self, side: Side, price: i64) -> Result<usize, usize> {
        let levels = self.levels(side);
        match side {
            Side::Bid => levels.binary_search_by(|l| price.cmp(&l.price)),
            Side::Ask => levels.binary_search_by(|l| l.price.cmp(&price)),
        }
    }

    /// Create or overwrite the level at `price`
    pub fn set_level(&mut self, side: Side, level: PriceLevel) -> Result<(), BookError> {
        match self.locate(side, level.price) {
            Ok(i) => {
                self.levels_mut(side)[i].size = level.size;
                Ok(())
            }
            Err(i) => self.new_level(side, i, level),
        }
    }

    pub fn delete_price(&mut self, side: Side, price: i64) -> Result<(), BookError> {
        match self.locate(side, price) {
            Ok(i) => {
                self.levels_mut(side).remove(i);
                Ok(())
            }
            // beyond the tracked depth
            Err(i) if i >= self.max_depth => Ok(()),
            Err(_) => Err(BookError::PriceNotFound { side, price }),
        }
    }

    pub fn apply(&mut self, entry: &Entry) -> Result<(), BookError> {
        let Some(side) = entry.kind.side() else {
            self.clear();
            self.empty = true;
            return Ok(());
        };
        self.empty = false;

        let price = entry.price.map(|p| self.price_in_ticks(p)).transpose()?;
        let level = |price: Option<i64>| {
            price
                .map(|price| PriceLevel { price, size: entry.size })
                .ok_or(BookError::MissingField("MDEntryPx"))
        };

        match (entry.action, entry.level) {
            (UpdateAction::New, Some(i)) => self.new_level(side, i, level(price)?),
            (UpdateAction::Change, Some(i)) => self.change_level(side, i, level(price)?),
            (UpdateAction::Delete, Some(i)) => self.delete_level(side, i, price),
            (UpdateAction::New | UpdateAction::Change, None) => self.set_level(side, level(price)?),
            (UpdateAction::Delete, None) => {
                self.delete_price(side, price.ok_or(BookError::MissingField("MDEntryPx"))?)
            }
        }
    }

    pub fn clear(&mut self) {
        self.bids.clear();
        self.asks.clear();
        self.empty = false;
    }

    pub fn best_bid(&self) -> Option<(Decimal, i64)> {
        self.bids.first().map(|l| (self.to_price(l.price), l.size))
    }

    pub fn best_ask(&self) -> Option<(Decimal, i64)> {
        self.asks.first().map(|l| (self.to_price(l.price), l.size))
    }

    /// Best ask minus best bid, when the book is not crossed
    pub fn spread(&self) -> Option<Decimal> {
        match (self.bids.first(), self.asks.first()) {
            (Some(bid), Some(ask)) if bid.price < ask.price => Some(self.to_price(ask.price - bid.price)),
            _ => None,
        }
    }

    /// Top `n` levels on each side
    pub fn depth(&self, n: usize) -> BookDepth {
        let top = |levels: &Levels| -> Vec<(Decimal, i64)> {
            levels
                .iter()
                .take(n)
                .map(|l| (self.to_price(l.price), l.size))
                .collect()
        };

        BookDepth {
            bids: top(&self.bids),
            asks: top(&self.asks),
        }
    }

    pub fn bid_levels(&self) -> usize {
        self.bids.len()
    }

    pub fn ask_levels(&self) -> usize {
        self.asks.len()
    }

    pub fn snapshot(&self) -> BookSnapshot {
        BookSnapshot {
            symbol: self.symbol.clone(),
            security_id: self.security_id,
            active: self.active,
            rptseq: self.rptseq,
            depth: self.depth(self.max_depth),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BookDepth {
    pub bids: Vec<(Decimal, i64)>,
    pub asks: Vec<(Decimal, i64)>,
}

/// Owned copy of a book for downstream consumers
#[derive(Debug, Clone, PartialEq)]
pub struct BookSnapshot {
    pub symbol: String,
    pub security_id: u64,
    pub active: bool,
    pub rptseq: u64,
    pub depth: BookDepth,
}
