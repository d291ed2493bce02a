//! Dice games: classic sicbo, fast sicbo (one die) and four-colour dice.
//!
//! Bet codes (odds X:1):
//! 1 = Big, 2 = Small, 3 = Odd, 4 = Even (lose on any triple)
//! 10 + n = Total n, n in 4..=17
//! 30 + n = Single n, pays the number of dice showing n
//! 40 + n = Double n (8)
//! 50 = Any Triple (24), 50 + n = Triple n (150)
//! 100 + 10a + b = Combination a < b (5)
//! 60 + k = Colour k for four-colour dice (1 red, 2 yellow, 3 blue, 4 green),
//!          pays the number of dice showing it; faces 5 and 6 are white
//! 65 = Same Colour (20)
//!
//! Fast sicbo rolls one die: Big is 4-6, Small 1-3, all four pay 0.96 and a
//! single number pays 5.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;

use super::{parse_details, plain_leg, BetCode, BetMap, CalcError, GameType, HitResult, OddsCalculator};

pub mod codes {
    use super::BetCode;

    pub const BIG: BetCode = 1;
    pub const SMALL: BetCode = 2;
    pub const ODD: BetCode = 3;
    pub const EVEN: BetCode = 4;
    pub const TOTAL_BASE: BetCode = 10;
    pub const SINGLE_BASE: BetCode = 30;
    pub const DOUBLE_BASE: BetCode = 40;
    pub const ANY_TRIPLE: BetCode = 50;
    pub const TRIPLE_BASE: BetCode = 50;
    pub const COLOR_BASE: BetCode = 60;
    pub const SAME_COLOR: BetCode = 65;
    pub const COMBO_BASE: BetCode = 100;

    pub const fn total(sum: u8) -> BetCode {
        TOTAL_BASE + sum as BetCode
    }

    pub const fn single(face: u8) -> BetCode {
        SINGLE_BASE + face as BetCode
    }

    pub const fn double(face: u8) -> BetCode {
        DOUBLE_BASE + face as BetCode
    }

    pub const fn triple(face: u8) -> BetCode {
        TRIPLE_BASE + face as BetCode
    }

    pub const fn combo(low: u8, high: u8) -> BetCode {
        COMBO_BASE + (low as BetCode) * 10 + high as BetCode
    }

    pub const fn color(index: u8) -> BetCode {
        COLOR_BASE + index as BetCode
    }
}

use codes::*;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Variant {
    Classic,
    Fast,
    FourColor,
}

#[derive(Clone, Debug, Deserialize)]
pub struct DiceDetails {
    pub dice: Vec<u8>,
}

fn total_odds(sum: u8) -> Option<Decimal> {
    match sum {
        4 | 17 => Some(dec!(50)),
        5 | 16 => Some(dec!(18)),
        6 | 15 => Some(dec!(14)),
        7 | 14 => Some(dec!(12)),
        8 | 13 => Some(dec!(8)),
        9..=12 => Some(dec!(6)),
        _ => None,
    }
}

/// Dice showing `face`, recovered from the single/double/triple markers.
fn face_count(hits: &HitResult, face: u8) -> u8 {
    if !hits.contains(single(face)) {
        return 0;
    }
    1 + u8::from(hits.contains(double(face))) + u8::from(hits.contains(triple(face)))
}

pub struct Sicbo {
    variant: Variant,
}

impl Sicbo {
    pub const fn new(variant: Variant) -> Self {
        Self { variant }
    }

    pub fn variant(&self) -> Variant {
        self.variant
    }

    fn dice_count(&self) -> usize {
        match self.variant {
            Variant::Fast => 1,
            Variant::Classic | Variant::FourColor => 3,
        }
    }

    fn even_money(&self) -> Decimal {
        match self.variant {
            Variant::Fast => dec!(0.96),
            Variant::Classic | Variant::FourColor => dec!(1),
        }
    }

    fn leg(&self, code: BetCode, amount: Decimal, hits: &HitResult) -> Option<Decimal> {
        let hit = hits.contains(code);
        let classic = self.variant == Variant::Classic;
        let leg = match code {
            BIG | SMALL | ODD | EVEN => plain_leg(amount, self.even_money(), hit),
            31..=36 => {
                let face = (code - SINGLE_BASE) as u8;
                match self.variant {
                    Variant::Fast => plain_leg(amount, dec!(5), hit),
                    Variant::Classic => match face_count(hits, face) {
                        0 => -amount,
                        count => amount * Decimal::from(count),
                    },
                    Variant::FourColor => return None,
                }
            }
            61..=64 if self.variant == Variant::FourColor => {
                let face = (code - COLOR_BASE) as u8;
                match face_count(hits, face) {
                    0 => -amount,
                    count => amount * Decimal::from(count),
                }
            }
            SAME_COLOR if self.variant == Variant::FourColor => plain_leg(amount, dec!(20), hit),
            14..=27 if classic => {
                let odds = total_odds((code - TOTAL_BASE) as u8)?;
                plain_leg(amount, odds, hit)
            }
            41..=46 if classic => plain_leg(amount, dec!(8), hit),
            ANY_TRIPLE if classic => plain_leg(amount, dec!(24), hit),
            51..=56 if classic => plain_leg(amount, dec!(150), hit),
            112..=156 if classic => {
                let low = (code - COMBO_BASE) / 10;
                let high = (code - COMBO_BASE) % 10;
                if !(1..=5).contains(&low) || !(low + 1..=6).contains(&high) {
                    return None;
                }
                plain_leg(amount, dec!(5), hit)
            }
            _ => return None,
        };
        Some(leg)
    }
}

impl OddsCalculator for Sicbo {
    fn game_type(&self) -> GameType {
        match self.variant {
            Variant::Classic => GameType::Sicbo,
            Variant::Fast => GameType::FastSicbo,
            Variant::FourColor => GameType::FourColorDice,
        }
    }

    fn parse_result(&self, details: &serde_json::Value) -> Result<HitResult, CalcError> {
        let DiceDetails { dice } = parse_details(self.game_type(), details)?;
        if dice.len() != self.dice_count() {
            return Err(CalcError::invalid(format!(
                "{} expects {} dice, got {}",
                self.game_type(),
                self.dice_count(),
                dice.len()
            )));
        }
        if let Some(face) = dice.iter().find(|face| !(1..=6).contains(*face)) {
            return Err(CalcError::invalid(format!("die face {face} out of range")));
        }

        let mut hits = Vec::new();

        if self.variant == Variant::Fast {
            let face = dice[0];
            hits.push(if face >= 4 { BIG } else { SMALL });
            hits.push(if face % 2 == 1 { ODD } else { EVEN });
            hits.push(single(face));
            return Ok(HitResult::from_codes(hits));
        }

        let sum: u8 = dice.iter().sum();
        let mut counts = [0u8; 7];
        for &face in &dice {
            counts[usize::from(face)] += 1;
        }
        let triple_face = (1..=6u8).find(|face| counts[usize::from(*face)] == 3);

        if triple_face.is_none() {
            hits.push(if sum >= 11 { BIG } else { SMALL });
            hits.push(if sum % 2 == 1 { ODD } else { EVEN });
        }
        if (4..=17).contains(&sum) {
            hits.push(total(sum));
        }
        for face in 1..=6u8 {
            let count = counts[usize::from(face)];
            if count >= 1 {
                hits.push(single(face));
            }
            if count >= 2 {
                hits.push(double(face));
            }
            if count == 3 {
                hits.push(triple(face));
                hits.push(ANY_TRIPLE);
            }
        }
        for low in 1..=5u8 {
            for high in (low + 1)..=6u8 {
                if counts[usize::from(low)] > 0 && counts[usize::from(high)] > 0 {
                    hits.push(combo(low, high));
                }
            }
        }

        if self.variant == Variant::FourColor {
            for colour in 1..=4u8 {
                if counts[usize::from(colour)] > 0 {
                    hits.push(color(colour));
                }
            }
            if matches!(triple_face, Some(face) if face <= 4) {
                hits.push(SAME_COLOR);
            }
        }

        Ok(HitResult::from_codes(hits))
    }

    fn calc_win_lose(&self, bets: &BetMap, hits: &HitResult) -> Result<Decimal, CalcError> {
        let mut total = Decimal::ZERO;
        for (&code, &amount) in bets {
            total += self.leg(code, amount, hits).ok_or(CalcError::UnknownBet {
                game: self.game_type(),
                code,
            })?;
        }
        Ok(total)
    }

    fn calc_rolling(&self, total_bet: Decimal, _bets: &BetMap, _hits: &HitResult) -> Decimal {
        total_bet
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const CLASSIC: Sicbo = Sicbo::new(Variant::Classic);
    const FAST: Sicbo = Sicbo::new(Variant::Fast);
    const FOUR: Sicbo = Sicbo::new(Variant::FourColor);

    fn roll(calc: &Sicbo, dice: &[u8]) -> HitResult {
        calc.parse_result(&json!({ "dice": dice })).unwrap()
    }

    #[test]
    fn big_small_odd_even_lose_on_triples() {
        let hits = roll(&CLASSIC, &[4, 4, 4]);
        assert!(!hits.contains(BIG));
        assert!(!hits.contains(SMALL));
        assert!(!hits.contains(EVEN));
        assert!(hits.contains(ANY_TRIPLE));
        assert!(hits.contains(triple(4)));
        assert!(hits.contains(total(12)));

        let bets: BetMap = [(BIG, dec!(10)), (ANY_TRIPLE, dec!(10)), (triple(4), dec!(1))].into();
        assert_eq!(CLASSIC.calc_win_lose(&bets, &hits).unwrap(), dec!(380));
    }

    #[test]
    fn single_pays_per_matching_die() {
        let hits = roll(&CLASSIC, &[2, 2, 5]);
        let bets: BetMap = [(single(2), dec!(10)), (single(5), dec!(10)), (single(6), dec!(10))].into();
        // 2x, 1x, lose
        assert_eq!(CLASSIC.calc_win_lose(&bets, &hits).unwrap(), dec!(20));

        let hits = roll(&CLASSIC, &[3, 3, 3]);
        let bets: BetMap = [(single(3), dec!(10))].into();
        assert_eq!(CLASSIC.calc_win_lose(&bets, &hits).unwrap(), dec!(30));
    }

    #[test]
    fn totals_doubles_and_combinations() {
        let hits = roll(&CLASSIC, &[1, 1, 2]);
        assert!(hits.contains(SMALL));
        assert!(hits.contains(EVEN));
        assert!(hits.contains(total(4)));
        assert!(hits.contains(double(1)));
        assert!(hits.contains(combo(1, 2)));
        assert!(!hits.contains(combo(1, 1)));

        let bets: BetMap = [
            (total(4), dec!(1)),
            (double(1), dec!(1)),
            (combo(1, 2), dec!(1)),
            (combo(3, 4), dec!(1)),
        ]
        .into();
        assert_eq!(CLASSIC.calc_win_lose(&bets, &hits).unwrap(), dec!(62));
    }

    #[test]
    fn fast_sicbo_uses_one_die() {
        let hits = roll(&FAST, &[5]);
        assert_eq!(hits.codes(), &[BIG, ODD, single(5)]);
        let bets: BetMap = [(BIG, dec!(100)), (single(5), dec!(10)), (single(1), dec!(10))].into();
        assert_eq!(FAST.calc_win_lose(&bets, &hits).unwrap(), dec!(136));

        assert!(FAST.parse_result(&json!({"dice": [1, 2, 3]})).is_err());
        let total_bet: BetMap = [(total(10), dec!(1))].into();
        assert!(FAST.calc_win_lose(&total_bet, &hits).is_err());
    }

    #[test]
    fn four_colour_counts_colours() {
        let hits = roll(&FOUR, &[1, 1, 6]);
        assert!(hits.contains(color(1)));
        assert!(!hits.contains(color(2)));
        assert!(!hits.contains(SAME_COLOR));
        let bets: BetMap = [(color(1), dec!(10)), (color(4), dec!(10))].into();
        assert_eq!(FOUR.calc_win_lose(&bets, &hits).unwrap(), dec!(10));

        let hits = roll(&FOUR, &[3, 3, 3]);
        assert!(hits.contains(SAME_COLOR));
        let hits = roll(&FOUR, &[6, 6, 6]);
        assert!(!hits.contains(SAME_COLOR));
    }

    #[test]
    fn invalid_faces_and_codes_fail() {
        assert!(CLASSIC.parse_result(&json!({"dice": [0, 2, 3]})).is_err());
        let hits = roll(&CLASSIC, &[1, 2, 3]);
        let bad: BetMap = [(combo(3, 3), dec!(1))].into();
        assert!(CLASSIC.calc_win_lose(&bad, &hits).is_err());
        let bad: BetMap = [(total(3), dec!(1))].into();
        assert!(CLASSIC.calc_win_lose(&bad, &hits).is_err());
    }
}
