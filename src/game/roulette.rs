//! Single-zero roulette with static coverage tables.
//!
//! Bet codes (odds X:1):
//! 0..=36 = Straight (35)
//! 100..=159 = Split (17): 0-1, 0-2, 0-3, then row pairs, then n / n+3
//! 200..=211 = Street (11)
//! 300..=321 = Corner (8)
//! 400..=410 = Line, two adjacent streets (5)
//! 501..=503 = Dozen, 511..=513 = Column (2)
//! 521 Red, 522 Black, 523 Odd, 524 Even, 525 Low 1-18, 526 High 19-36 (1)

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;

use super::{parse_details, plain_leg, BetCode, BetMap, CalcError, GameType, HitResult, OddsCalculator};

pub mod codes {
    use super::BetCode;

    pub const SPLIT_BASE: BetCode = 100;
    pub const STREET_BASE: BetCode = 200;
    pub const CORNER_BASE: BetCode = 300;
    pub const LINE_BASE: BetCode = 400;
    pub const DOZEN_BASE: BetCode = 500;
    pub const COLUMN_BASE: BetCode = 510;
    pub const RED: BetCode = 521;
    pub const BLACK: BetCode = 522;
    pub const ODD: BetCode = 523;
    pub const EVEN: BetCode = 524;
    pub const LOW: BetCode = 525;
    pub const HIGH: BetCode = 526;
}

use codes::*;

pub const RED_NUMBERS: [u8; 18] = [
    1, 3, 5, 7, 9, 12, 14, 16, 18, 19, 21, 23, 25, 27, 30, 32, 34, 36,
];

#[derive(Clone, Debug, Deserialize)]
pub struct RouletteDetails {
    pub number: u8,
}

pub fn is_red(number: u8) -> bool {
    RED_NUMBERS.contains(&number)
}

/// Numbers covered by every offered bet code.
static BET_TABLE: Lazy<BTreeMap<BetCode, Vec<u8>>> = Lazy::new(|| {
    let mut table = BTreeMap::new();

    for n in 0..=36u8 {
        table.insert(BetCode::from(n), vec![n]);
    }

    let mut splits = vec![vec![0, 1], vec![0, 2], vec![0, 3]];
    for row in 0..12u8 {
        let base = row * 3 + 1;
        splits.push(vec![base, base + 1]);
        splits.push(vec![base + 1, base + 2]);
    }
    for n in 1..=33u8 {
        splits.push(vec![n, n + 3]);
    }
    for (idx, numbers) in splits.into_iter().enumerate() {
        table.insert(SPLIT_BASE + idx as BetCode, numbers);
    }

    for row in 0..12u8 {
        let base = row * 3 + 1;
        table.insert(STREET_BASE + BetCode::from(row), vec![base, base + 1, base + 2]);
    }

    let mut corner = CORNER_BASE;
    for row in 0..11u8 {
        for col in 0..2u8 {
            let n = row * 3 + col + 1;
            table.insert(corner, vec![n, n + 1, n + 3, n + 4]);
            corner += 1;
        }
    }

    for row in 0..11u8 {
        let base = row * 3 + 1;
        table.insert(LINE_BASE + BetCode::from(row), (base..base + 6).collect());
    }

    for dozen in 0..3u8 {
        let start = dozen * 12 + 1;
        table.insert(
            DOZEN_BASE + 1 + BetCode::from(dozen),
            (start..start + 12).collect(),
        );
    }
    for column in 0..3u8 {
        table.insert(
            COLUMN_BASE + 1 + BetCode::from(column),
            (1..=36u8).filter(|n| (n - 1) % 3 == column).collect(),
        );
    }

    table.insert(RED, (1..=36u8).filter(|n| is_red(*n)).collect());
    table.insert(BLACK, (1..=36u8).filter(|n| !is_red(*n)).collect());
    table.insert(ODD, (1..=36u8).filter(|n| n % 2 == 1).collect());
    table.insert(EVEN, (1..=36u8).filter(|n| n % 2 == 0).collect());
    table.insert(LOW, (1..=18u8).collect());
    table.insert(HIGH, (19..=36u8).collect());

    table
});

/// Bet codes satisfied by each number, indexed by number.
static COVERAGE: Lazy<Vec<Vec<BetCode>>> = Lazy::new(|| {
    let mut coverage = vec![Vec::new(); 37];
    for (code, numbers) in BET_TABLE.iter() {
        for &n in numbers {
            coverage[usize::from(n)].push(*code);
        }
    }
    coverage
});

pub fn coverage(number: u8) -> Option<&'static [BetCode]> {
    COVERAGE.get(usize::from(number)).map(Vec::as_slice)
}

fn odds(code: BetCode) -> Option<Decimal> {
    if !BET_TABLE.contains_key(&code) {
        return None;
    }
    let odds = match code {
        0..=36 => dec!(35),
        100..=159 => dec!(17),
        200..=211 => dec!(11),
        300..=321 => dec!(8),
        400..=410 => dec!(5),
        501..=503 | 511..=513 => dec!(2),
        _ => dec!(1),
    };
    Some(odds)
}

pub struct Roulette;

impl Roulette {
    /// Winning number recovered from a hit result (the single straight code).
    pub fn winning_number(hits: &HitResult) -> Option<u8> {
        hits.codes()
            .iter()
            .find(|code| **code <= 36)
            .map(|code| *code as u8)
    }
}

impl OddsCalculator for Roulette {
    fn game_type(&self) -> GameType {
        GameType::Roulette
    }

    fn parse_result(&self, details: &serde_json::Value) -> Result<HitResult, CalcError> {
        let RouletteDetails { number } = parse_details(GameType::Roulette, details)?;
        let codes = coverage(number)
            .ok_or_else(|| CalcError::invalid(format!("roulette number {number} out of range")))?;
        Ok(HitResult::from_codes(codes.iter().copied()))
    }

    fn calc_win_lose(&self, bets: &BetMap, hits: &HitResult) -> Result<Decimal, CalcError> {
        let mut total = Decimal::ZERO;
        for (&code, &amount) in bets {
            let odds = odds(code).ok_or(CalcError::UnknownBet {
                game: GameType::Roulette,
                code,
            })?;
            total += plain_leg(amount, odds, hits.contains(code));
        }
        Ok(total)
    }

    fn calc_rolling(&self, total_bet: Decimal, _bets: &BetMap, _hits: &HitResult) -> Decimal {
        total_bet
    }
}
