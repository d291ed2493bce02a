//! Dragon-Tiger: one card per side, ace low, king high.
//!
//! Bet codes (odds X:1):
//! 1 = Dragon (1), 2 = Tiger (1), 3 = Tie (8)
//! 4/5 = Dragon Odd (0.75) / Even (1.05)
//! 6/7 = Tiger Odd (0.75) / Even (1.05)
//! 8/9 = Dragon Red / Black (0.9)
//! 10/11 = Tiger Red / Black (0.9)
//!
//! A seven loses that side's parity and colour bets. On a tie, Dragon and
//! Tiger stakes lose half.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;

use super::{
    parse_details, plain_leg, BetCode, BetMap, CalcError, Card, GameType, HitResult,
    OddsCalculator,
};

pub mod codes {
    use super::BetCode;

    pub const DRAGON: BetCode = 1;
    pub const TIGER: BetCode = 2;
    pub const TIE: BetCode = 3;
    pub const DRAGON_ODD: BetCode = 4;
    pub const DRAGON_EVEN: BetCode = 5;
    pub const TIGER_ODD: BetCode = 6;
    pub const TIGER_EVEN: BetCode = 7;
    pub const DRAGON_RED: BetCode = 8;
    pub const DRAGON_BLACK: BetCode = 9;
    pub const TIGER_RED: BetCode = 10;
    pub const TIGER_BLACK: BetCode = 11;
}

use codes::*;

#[derive(Clone, Debug, Deserialize)]
pub struct DragonTigerDetails {
    pub dragon: Card,
    pub tiger: Card,
}

fn odds(code: BetCode) -> Option<Decimal> {
    match code {
        DRAGON | TIGER => Some(dec!(1)),
        TIE => Some(dec!(8)),
        DRAGON_ODD | TIGER_ODD => Some(dec!(0.75)),
        DRAGON_EVEN | TIGER_EVEN => Some(dec!(1.05)),
        DRAGON_RED | DRAGON_BLACK | TIGER_RED | TIGER_BLACK => Some(dec!(0.9)),
        _ => None,
    }
}

/// Side bets for one card: (odd, even, red, black) codes.
fn side_hits(card: Card, side: [BetCode; 4], hits: &mut Vec<BetCode>) {
    if card.rank() == 7 {
        return;
    }
    let [odd, even, red, black] = side;
    hits.push(if card.rank() % 2 == 1 { odd } else { even });
    hits.push(if card.is_red() { red } else { black });
}

pub struct DragonTiger;

impl OddsCalculator for DragonTiger {
    fn game_type(&self) -> GameType {
        GameType::DragonTiger
    }

    fn parse_result(&self, details: &serde_json::Value) -> Result<HitResult, CalcError> {
        let DragonTigerDetails { dragon, tiger } = parse_details(GameType::DragonTiger, details)?;
        let mut hits = Vec::with_capacity(5);

        hits.push(match dragon.rank().cmp(&tiger.rank()) {
            std::cmp::Ordering::Greater => DRAGON,
            std::cmp::Ordering::Less => TIGER,
            std::cmp::Ordering::Equal => TIE,
        });
        side_hits(dragon, [DRAGON_ODD, DRAGON_EVEN, DRAGON_RED, DRAGON_BLACK], &mut hits);
        side_hits(tiger, [TIGER_ODD, TIGER_EVEN, TIGER_RED, TIGER_BLACK], &mut hits);

        Ok(HitResult::from_codes(hits))
    }

    fn calc_win_lose(&self, bets: &BetMap, hits: &HitResult) -> Result<Decimal, CalcError> {
        let tie = hits.contains(TIE);
        let mut total = Decimal::ZERO;
        for (&code, &amount) in bets {
            let odds = odds(code).ok_or(CalcError::UnknownBet {
                game: GameType::DragonTiger,
                code,
            })?;
            total += match code {
                DRAGON | TIGER if tie => -amount / dec!(2),
                _ => plain_leg(amount, odds, hits.contains(code)),
            };
        }
        Ok(total)
    }

    fn calc_rolling(&self, total_bet: Decimal, bets: &BetMap, hits: &HitResult) -> Decimal {
        if !hits.contains(TIE) {
            return total_bet;
        }
        let main: Decimal = [DRAGON, TIGER]
            .iter()
            .filter_map(|code| bets.get(code))
            .copied()
            .sum();
        total_bet - main / dec!(2)
    }
}
