//! Baccarat outcome and payouts.
//!
//! Cards arrive already drawn, so the third-card tableau is not evaluated
//! here. Hand point is the card sum mod 10 with tens and faces at zero.
//!
//! Bet codes (odds X:1):
//! 1 = Banker (0.95, push on tie)
//! 2 = Player (1, push on tie)
//! 3 = Tie (8)
//! 4 = Banker Pair (11)
//! 5 = Player Pair (11)
//! 6 = Big, five or six cards (0.54)
//! 7 = Small, four cards (1.5)
//! 8 = Perfect Pair, either hand's first two cards identical (25)
//! 9 = Either Pair (5)
//! 10 = Banker Bonus (margin table)
//! 11 = Player Bonus (margin table)
//! 12 = Super Six, banker wins on 6 (12)
//! 13 = Banker without commission (1, 0.5 when banker wins on 6)
//!
//! Hit-only markers:
//! 14 = banker natural, 15 = player natural,
//! 24..=29 = non-natural winner margin 4..=9 (bonus table key).

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;

use super::{
    parse_details, plain_leg, stake_on, BetCode, BetMap, CalcError, Card, GameType, HitResult,
    OddsCalculator,
};

pub mod codes {
    use super::BetCode;

    pub const BANKER: BetCode = 1;
    pub const PLAYER: BetCode = 2;
    pub const TIE: BetCode = 3;
    pub const BANKER_PAIR: BetCode = 4;
    pub const PLAYER_PAIR: BetCode = 5;
    pub const BIG: BetCode = 6;
    pub const SMALL: BetCode = 7;
    pub const PERFECT_PAIR: BetCode = 8;
    pub const EITHER_PAIR: BetCode = 9;
    pub const BANKER_BONUS: BetCode = 10;
    pub const PLAYER_BONUS: BetCode = 11;
    pub const SUPER_SIX: BetCode = 12;
    pub const BANKER_NO_COMMISSION: BetCode = 13;
    pub const BANKER_NATURAL: BetCode = 14;
    pub const PLAYER_NATURAL: BetCode = 15;
    pub const MARGIN_BASE: BetCode = 20;
}

use codes::*;

/// Raw cards of one baccarat deal.
#[derive(Clone, Debug, Deserialize)]
pub struct BaccaratDetails {
    pub banker: Vec<Card>,
    pub player: Vec<Card>,
}

/// Hand point (0..=9).
pub fn point(cards: &[Card]) -> u8 {
    let sum: u32 = cards.iter().map(|card| u32::from(card.baccarat_point())).sum();
    (sum % 10) as u8
}

fn is_pair(hand: &[Card]) -> bool {
    hand.len() >= 2 && hand[0].rank() == hand[1].rank()
}

fn is_perfect_pair(hand: &[Card]) -> bool {
    hand.len() >= 2 && hand[0] == hand[1]
}

fn is_natural(hand: &[Card]) -> bool {
    hand.len() == 2 && point(hand) >= 8
}

/// Bonus odds keyed by the winner's point margin; margins up to 3 lose.
fn bonus_odds(margin: u8) -> Option<Decimal> {
    match margin {
        4 => Some(dec!(1)),
        5 => Some(dec!(2)),
        6 => Some(dec!(4)),
        7 => Some(dec!(6)),
        8 => Some(dec!(10)),
        9 => Some(dec!(30)),
        _ => None,
    }
}

fn fixed_odds(code: BetCode) -> Option<Decimal> {
    match code {
        TIE => Some(dec!(8)),
        BANKER_PAIR | PLAYER_PAIR => Some(dec!(11)),
        BIG => Some(dec!(0.54)),
        SMALL => Some(dec!(1.5)),
        PERFECT_PAIR => Some(dec!(25)),
        EITHER_PAIR => Some(dec!(5)),
        SUPER_SIX => Some(dec!(12)),
        _ => None,
    }
}

pub struct Baccarat;

impl Baccarat {
    fn bonus_leg(amount: Decimal, side: BetCode, hits: &HitResult) -> Decimal {
        let (won, natural) = if side == BANKER_BONUS {
            (hits.contains(BANKER), hits.contains(BANKER_NATURAL))
        } else {
            (hits.contains(PLAYER), hits.contains(PLAYER_NATURAL))
        };

        if won {
            if natural {
                return amount;
            }
            let odds = (4..=9u8)
                .find(|margin| hits.contains(MARGIN_BASE + BetCode::from(*margin)))
                .and_then(bonus_odds);
            return match odds {
                Some(odds) => amount * odds,
                None => -amount,
            };
        }

        let natural_tie =
            hits.contains(TIE) && hits.contains(BANKER_NATURAL) && hits.contains(PLAYER_NATURAL);
        if natural_tie {
            Decimal::ZERO
        } else {
            -amount
        }
    }
}

impl OddsCalculator for Baccarat {
    fn game_type(&self) -> GameType {
        GameType::Baccarat
    }

    fn parse_result(&self, details: &serde_json::Value) -> Result<HitResult, CalcError> {
        let details: BaccaratDetails = parse_details(GameType::Baccarat, details)?;
        let BaccaratDetails { banker, player } = details;
        for (label, hand) in [("banker", &banker), ("player", &player)] {
            if !(2..=3).contains(&hand.len()) {
                return Err(CalcError::invalid(format!(
                    "baccarat {label} hand must hold 2 or 3 cards, got {}",
                    hand.len()
                )));
            }
        }

        let banker_point = point(&banker);
        let player_point = point(&player);
        let banker_natural = is_natural(&banker);
        let player_natural = is_natural(&player);
        let mut hits = Vec::new();

        match banker_point.cmp(&player_point) {
            std::cmp::Ordering::Greater => {
                hits.push(BANKER);
                if banker_point == 6 {
                    hits.push(SUPER_SIX);
                }
                if banker_natural {
                    hits.push(BANKER_BONUS);
                } else if bonus_odds(banker_point - player_point).is_some() {
                    hits.push(BANKER_BONUS);
                    hits.push(MARGIN_BASE + BetCode::from(banker_point - player_point));
                }
            }
            std::cmp::Ordering::Less => {
                hits.push(PLAYER);
                if player_natural {
                    hits.push(PLAYER_BONUS);
                } else if bonus_odds(player_point - banker_point).is_some() {
                    hits.push(PLAYER_BONUS);
                    hits.push(MARGIN_BASE + BetCode::from(player_point - banker_point));
                }
            }
            std::cmp::Ordering::Equal => hits.push(TIE),
        }

        let banker_pair = is_pair(&banker);
        let player_pair = is_pair(&player);
        if banker_pair {
            hits.push(BANKER_PAIR);
        }
        if player_pair {
            hits.push(PLAYER_PAIR);
        }
        if banker_pair || player_pair {
            hits.push(EITHER_PAIR);
        }
        if is_perfect_pair(&banker) || is_perfect_pair(&player) {
            hits.push(PERFECT_PAIR);
        }

        if banker.len() + player.len() == 4 {
            hits.push(SMALL);
        } else {
            hits.push(BIG);
        }

        if banker_natural {
            hits.push(BANKER_NATURAL);
        }
        if player_natural {
            hits.push(PLAYER_NATURAL);
        }

        Ok(HitResult::from_codes(hits))
    }

    fn calc_win_lose(&self, bets: &BetMap, hits: &HitResult) -> Result<Decimal, CalcError> {
        let tie = hits.contains(TIE);
        let mut total = Decimal::ZERO;

        for (&code, &amount) in bets {
            let leg = match code {
                BANKER => {
                    if hits.contains(BANKER) {
                        amount * dec!(0.95)
                    } else if tie {
                        Decimal::ZERO
                    } else {
                        -amount
                    }
                }
                PLAYER => {
                    if hits.contains(PLAYER) {
                        amount
                    } else if tie {
                        Decimal::ZERO
                    } else {
                        -amount
                    }
                }
                BANKER_NO_COMMISSION => {
                    if hits.contains(BANKER) {
                        if hits.contains(SUPER_SIX) {
                            amount * dec!(0.5)
                        } else {
                            amount
                        }
                    } else if tie {
                        Decimal::ZERO
                    } else {
                        -amount
                    }
                }
                BANKER_BONUS | PLAYER_BONUS => Self::bonus_leg(amount, code, hits),
                other => {
                    let odds = fixed_odds(other).ok_or(CalcError::UnknownBet {
                        game: GameType::Baccarat,
                        code: other,
                    })?;
                    plain_leg(amount, odds, hits.contains(other))
                }
            };
            total += leg;
        }

        Ok(total)
    }

    fn calc_rolling(&self, total_bet: Decimal, bets: &BetMap, hits: &HitResult) -> Decimal {
        if hits.contains(TIE) {
            total_bet - stake_on(bets, &[BANKER, PLAYER, BANKER_NO_COMMISSION])
        } else {
            total_bet
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::cards::card;
    use crate::game::Suit::*;
    use serde_json::json;

    fn details(banker: &[Card], player: &[Card]) -> serde_json::Value {
        json!({
            "banker": banker.iter().map(|c| c.code()).collect::<Vec<_>>(),
            "player": player.iter().map(|c| c.code()).collect::<Vec<_>>(),
        })
    }

    fn bets(legs: &[(BetCode, Decimal)]) -> BetMap {
        legs.iter().copied().collect()
    }

    #[test]
    fn banker_five_beats_player_four() {
        let hits = Baccarat
            .parse_result(&details(
                &[card(13, Spade), card(5, Heart)],
                &[card(9, Club), card(5, Diamond)],
            ))
            .unwrap();

        assert!(hits.contains(BANKER));
        assert!(hits.contains(SMALL));
        assert!(!hits.contains(BANKER_PAIR));
        assert!(!hits.contains(PLAYER_PAIR));
        assert!(!hits.contains(EITHER_PAIR));

        let banker = Baccarat
            .calc_win_lose(&bets(&[(BANKER, dec!(10))]), &hits)
            .unwrap();
        assert_eq!(banker, dec!(9.5));
        let player = Baccarat
            .calc_win_lose(&bets(&[(PLAYER, dec!(10))]), &hits)
            .unwrap();
        assert_eq!(player, dec!(-10));
    }

    #[test]
    fn same_rank_is_a_pair_and_identical_card_is_perfect() {
        let hits = Baccarat
            .parse_result(&details(
                &[card(2, Spade), card(2, Spade)],
                &[card(7, Spade), card(7, Heart)],
            ))
            .unwrap();
        assert!(hits.contains(BANKER_PAIR));
        assert!(hits.contains(PLAYER_PAIR));
        assert!(hits.contains(PERFECT_PAIR));
        assert!(hits.contains(EITHER_PAIR));
        // 2+2 = 4 vs 7+7 = 14 -> 4
        assert!(hits.contains(TIE));
    }

    #[test]
    fn tie_pushes_main_bets_and_drops_them_from_rolling() {
        let hits = Baccarat
            .parse_result(&details(
                &[card(3, Spade), card(4, Heart)],
                &[card(2, Club), card(5, Diamond)],
            ))
            .unwrap();
        assert!(hits.contains(TIE));

        let legs = bets(&[(BANKER, dec!(100)), (PLAYER, dec!(50)), (TIE, dec!(10))]);
        let delta = Baccarat.calc_win_lose(&legs, &hits).unwrap();
        assert_eq!(delta, dec!(80));
        let rolling = Baccarat.calc_rolling(dec!(160), &legs, &hits);
        assert_eq!(rolling, dec!(10));
    }

    #[test]
    fn three_card_hands_are_big() {
        let hits = Baccarat
            .parse_result(&details(
                &[card(10, Spade), card(3, Heart), card(3, Club)],
                &[card(4, Club), card(1, Diamond)],
            ))
            .unwrap();
        assert!(hits.contains(BIG));
        assert!(!hits.contains(SMALL));
        assert!(hits.contains(BANKER));
        assert!(hits.contains(SUPER_SIX));

        let legs = bets(&[(BANKER_NO_COMMISSION, dec!(20)), (SUPER_SIX, dec!(10))]);
        assert_eq!(Baccarat.calc_win_lose(&legs, &hits).unwrap(), dec!(130));
    }

    #[test]
    fn bonus_pays_by_margin_and_natural() {
        // Player 9 (non natural, three cards) vs banker 2: margin 7 -> 6:1
        let hits = Baccarat
            .parse_result(&details(
                &[card(1, Spade), card(1, Heart)],
                &[card(3, Club), card(3, Diamond), card(3, Heart)],
            ))
            .unwrap();
        assert!(hits.contains(PLAYER_BONUS));
        assert!(hits.contains(MARGIN_BASE + 7));
        let legs = bets(&[(PLAYER_BONUS, dec!(10)), (BANKER_BONUS, dec!(10))]);
        assert_eq!(Baccarat.calc_win_lose(&legs, &hits).unwrap(), dec!(50));

        // Natural banker 8 vs player 7 pays even money
        let hits = Baccarat
            .parse_result(&details(
                &[card(4, Spade), card(4, Heart)],
                &[card(3, Club), card(4, Diamond)],
            ))
            .unwrap();
        assert!(hits.contains(BANKER_NATURAL));
        let legs = bets(&[(BANKER_BONUS, dec!(10))]);
        assert_eq!(Baccarat.calc_win_lose(&legs, &hits).unwrap(), dec!(10));
    }

    #[test]
    fn bonus_margin_of_three_loses_and_natural_tie_pushes() {
        let hits = Baccarat
            .parse_result(&details(
                &[card(3, Spade), card(3, Heart), card(1, Heart)],
                &[card(2, Club), card(2, Diamond)],
            ))
            .unwrap();
        assert!(hits.contains(BANKER));
        assert!(!hits.contains(BANKER_BONUS));
        let legs = bets(&[(BANKER_BONUS, dec!(10))]);
        assert_eq!(Baccarat.calc_win_lose(&legs, &hits).unwrap(), dec!(-10));

        let hits = Baccarat
            .parse_result(&details(
                &[card(4, Spade), card(5, Heart)],
                &[card(6, Club), card(3, Diamond)],
            ))
            .unwrap();
        assert!(hits.contains(TIE));
        let legs = bets(&[(BANKER_BONUS, dec!(10)), (PLAYER_BONUS, dec!(10))]);
        assert_eq!(Baccarat.calc_win_lose(&legs, &hits).unwrap(), Decimal::ZERO);
    }

    #[test]
    fn malformed_details_fail() {
        let err = Baccarat
            .parse_result(&json!({"banker": [1], "player": [2, 3]}))
            .unwrap_err();
        assert!(matches!(err, CalcError::InvalidDetails(_)));
        assert!(Baccarat.parse_result(&json!({"banker": [1, 2]})).is_err());
    }

    #[test]
    fn unknown_bet_code_is_rejected() {
        let hits = HitResult::from_codes([BANKER]);
        let err = Baccarat
            .calc_win_lose(&bets(&[(99, dec!(1))]), &hits)
            .unwrap_err();
        assert_eq!(
            err,
            CalcError::UnknownBet {
                game: GameType::Baccarat,
                code: 99
            }
        );
    }
}
