//! Outcome parsing and payout calculation for every live-table game.
//!
//! Each game family implements [`OddsCalculator`]. Calculators are pure: they
//! map raw outcome details (cards or dice) to a [`HitResult`] and map a wager
//! map plus a hit result to a signed money delta and a rolling amount. Every
//! piece of information a payout depends on is carried by the hit result, so
//! a settle that only receives the hit codes from the dealer prices exactly
//! like one that recomputes them from the cards.

pub mod baccarat;
pub mod bull;
pub mod cards;
pub mod dragon_phoenix;
pub mod dragon_tiger;
pub mod roulette;
pub mod sicbo;

use std::collections::BTreeMap;
use std::fmt;

use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub use cards::{Card, Suit};

/// Bet-type code. Hit codes share the same space.
pub type BetCode = u16;

/// Wager legs of one order keyed by bet-type code.
pub type BetMap = BTreeMap<BetCode, Decimal>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameType {
    Baccarat,
    DragonTiger,
    Sicbo,
    Roulette,
    Bull,
    DragonPhoenix,
    FourColorDice,
    FastSicbo,
}

impl GameType {
    pub const ALL: [GameType; 8] = [
        GameType::Baccarat,
        GameType::DragonTiger,
        GameType::Sicbo,
        GameType::Roulette,
        GameType::Bull,
        GameType::DragonPhoenix,
        GameType::FourColorDice,
        GameType::FastSicbo,
    ];

    /// Numeric code used in the durable store.
    pub fn code(self) -> i16 {
        match self {
            GameType::Baccarat => 1,
            GameType::DragonTiger => 2,
            GameType::Sicbo => 3,
            GameType::Roulette => 4,
            GameType::Bull => 5,
            GameType::DragonPhoenix => 6,
            GameType::FourColorDice => 7,
            GameType::FastSicbo => 8,
        }
    }

    pub fn from_code(code: i16) -> Option<Self> {
        Self::ALL.into_iter().find(|game| game.code() == code)
    }

    /// Card-shoe games number rounds within a shoe and keep the whole shoe in
    /// the history cache.
    pub fn is_shoe_game(self) -> bool {
        matches!(self, GameType::Baccarat | GameType::DragonTiger)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GameType::Baccarat => "baccarat",
            GameType::DragonTiger => "dragon_tiger",
            GameType::Sicbo => "sicbo",
            GameType::Roulette => "roulette",
            GameType::Bull => "bull",
            GameType::DragonPhoenix => "dragon_phoenix",
            GameType::FourColorDice => "four_color_dice",
            GameType::FastSicbo => "fast_sicbo",
        }
    }
}

impl fmt::Display for GameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CalcError {
    #[error("invalid outcome details: {0}")]
    InvalidDetails(String),
    #[error("bet code {code} is not offered by {game}")]
    UnknownBet { game: GameType, code: BetCode },
}

impl CalcError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidDetails(msg.into())
    }
}

/// Ordered, de-duplicated set of hit codes for one round.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HitResult(Vec<BetCode>);

impl HitResult {
    pub fn from_codes(codes: impl IntoIterator<Item = BetCode>) -> Self {
        let mut codes: Vec<BetCode> = codes.into_iter().collect();
        codes.sort_unstable();
        codes.dedup();
        Self(codes)
    }

    pub fn contains(&self, code: BetCode) -> bool {
        self.0.binary_search(&code).is_ok()
    }

    pub fn codes(&self) -> &[BetCode] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Per-game payout contract, selected once per round by [`calculator_for`].
pub trait OddsCalculator: Send + Sync {
    fn game_type(&self) -> GameType;

    /// Derive the hit result from raw outcome details.
    fn parse_result(&self, details: &serde_json::Value) -> Result<HitResult, CalcError>;

    /// Signed money delta of one order, stake excluded.
    fn calc_win_lose(&self, bets: &BetMap, hits: &HitResult) -> Result<Decimal, CalcError>;

    /// Commission-eligible turnover of one order.
    fn calc_rolling(&self, total_bet: Decimal, bets: &BetMap, hits: &HitResult) -> Decimal;
}

static BACCARAT: baccarat::Baccarat = baccarat::Baccarat;
static DRAGON_TIGER: dragon_tiger::DragonTiger = dragon_tiger::DragonTiger;
static DRAGON_PHOENIX: dragon_phoenix::DragonPhoenix = dragon_phoenix::DragonPhoenix;
static ROULETTE: roulette::Roulette = roulette::Roulette;
static BULL: bull::Bull = bull::Bull;
static SICBO: sicbo::Sicbo = sicbo::Sicbo::new(sicbo::Variant::Classic);
static FAST_SICBO: sicbo::Sicbo = sicbo::Sicbo::new(sicbo::Variant::Fast);
static FOUR_COLOR: sicbo::Sicbo = sicbo::Sicbo::new(sicbo::Variant::FourColor);

pub fn calculator_for(game: GameType) -> &'static dyn OddsCalculator {
    match game {
        GameType::Baccarat => &BACCARAT,
        GameType::DragonTiger => &DRAGON_TIGER,
        GameType::Sicbo => &SICBO,
        GameType::Roulette => &ROULETTE,
        GameType::Bull => &BULL,
        GameType::DragonPhoenix => &DRAGON_PHOENIX,
        GameType::FourColorDice => &FOUR_COLOR,
        GameType::FastSicbo => &FAST_SICBO,
    }
}

pub(crate) fn parse_details<T: DeserializeOwned>(
    game: GameType,
    details: &serde_json::Value,
) -> Result<T, CalcError> {
    serde_json::from_value(details.clone())
        .map_err(|err| CalcError::invalid(format!("{game}: {err}")))
}

/// Generic leg: a hit pays `amount × odds`, a miss loses the stake.
pub(crate) fn plain_leg(amount: Decimal, odds: Decimal, hit: bool) -> Decimal {
    if hit {
        amount * odds
    } else {
        -amount
    }
}

/// Sum of the stakes placed on the given codes.
pub(crate) fn stake_on(bets: &BetMap, codes: &[BetCode]) -> Decimal {
    codes
        .iter()
        .filter_map(|code| bets.get(code))
        .copied()
        .sum()
}
