//! Dragon-Phoenix: two three-card hands ranked poker style.
//!
//! Leopard (three of a kind) > straight flush > flush > straight > pair >
//! high card. Aces play high except in A-2-3, the lowest straight; A-K-Q is
//! the top straight. A mixed-suit 2-3-5 beats a leopard and nothing else.
//!
//! Bet codes (odds X:1):
//! 1 = Dragon (1, push on tie), 2 = Phoenix (1, push on tie), 3 = Tie marker
//! 4 = Pair Plus on the winning hand: pair of nines or better 1, straight 2,
//!     flush 3, straight flush 5, leopard 10
//! 5 = Leopard in either hand (20)
//!
//! Hit-only markers 20..=24 carry the winning hand category for Pair Plus.

use std::cmp::Ordering;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;

use super::{
    parse_details, plain_leg, stake_on, BetCode, BetMap, CalcError, Card, GameType, HitResult,
    OddsCalculator,
};

pub mod codes {
    use super::BetCode;

    pub const DRAGON: BetCode = 1;
    pub const PHOENIX: BetCode = 2;
    pub const TIE: BetCode = 3;
    pub const PAIR_PLUS: BetCode = 4;
    pub const LEOPARD: BetCode = 5;
    pub const WIN_PAIR_NINE_UP: BetCode = 20;
    pub const WIN_STRAIGHT: BetCode = 21;
    pub const WIN_FLUSH: BetCode = 22;
    pub const WIN_STRAIGHT_FLUSH: BetCode = 23;
    pub const WIN_LEOPARD: BetCode = 24;
}

use codes::*;

#[derive(Clone, Debug, Deserialize)]
pub struct DragonPhoenixDetails {
    pub dragon: [Card; 3],
    pub phoenix: [Card; 3],
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Category {
    HighCard,
    Pair,
    Straight,
    Flush,
    StraightFlush,
    Leopard,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HandRank {
    pub category: Category,
    /// Comparison values, most significant first (ace = 14, 1 in A-2-3).
    pub kickers: [u8; 3],
    /// Mixed-suit 2-3-5.
    pub special_235: bool,
}

fn high_value(card: Card) -> u8 {
    match card.rank() {
        1 => 14,
        rank => rank,
    }
}

pub fn evaluate(hand: &[Card; 3]) -> HandRank {
    let mut values = (*hand).map(high_value);
    values.sort_unstable_by(|a, b| b.cmp(a));
    let flush = hand.iter().all(|card| card.suit() == hand[0].suit());

    let straight_top = if values[0] == values[1] + 1 && values[1] == values[2] + 1 {
        Some(values)
    } else if values == [14, 3, 2] {
        Some([3, 2, 1])
    } else {
        None
    };

    let (category, kickers) = if values[0] == values[2] {
        (Category::Leopard, values)
    } else if let Some(run) = straight_top {
        if flush {
            (Category::StraightFlush, run)
        } else {
            (Category::Straight, run)
        }
    } else if flush {
        (Category::Flush, values)
    } else if values[0] == values[1] {
        (Category::Pair, [values[0], values[0], values[2]])
    } else if values[1] == values[2] {
        (Category::Pair, [values[1], values[1], values[0]])
    } else {
        (Category::HighCard, values)
    };

    HandRank {
        category,
        kickers,
        special_235: !flush && values == [5, 3, 2],
    }
}

pub fn compare(dragon: &HandRank, phoenix: &HandRank) -> Ordering {
    if dragon.special_235 && phoenix.category == Category::Leopard {
        return Ordering::Greater;
    }
    if phoenix.special_235 && dragon.category == Category::Leopard {
        return Ordering::Less;
    }
    (dragon.category, dragon.kickers).cmp(&(phoenix.category, phoenix.kickers))
}

fn pair_plus_marker(rank: &HandRank) -> Option<BetCode> {
    match rank.category {
        Category::Leopard => Some(WIN_LEOPARD),
        Category::StraightFlush => Some(WIN_STRAIGHT_FLUSH),
        Category::Flush => Some(WIN_FLUSH),
        Category::Straight => Some(WIN_STRAIGHT),
        Category::Pair if rank.kickers[0] >= 9 => Some(WIN_PAIR_NINE_UP),
        _ => None,
    }
}

fn pair_plus_odds(hits: &HitResult) -> Option<Decimal> {
    [
        (WIN_LEOPARD, dec!(10)),
        (WIN_STRAIGHT_FLUSH, dec!(5)),
        (WIN_FLUSH, dec!(3)),
        (WIN_STRAIGHT, dec!(2)),
        (WIN_PAIR_NINE_UP, dec!(1)),
    ]
    .into_iter()
    .find(|(marker, _)| hits.contains(*marker))
    .map(|(_, odds)| odds)
}

pub struct DragonPhoenix;

impl OddsCalculator for DragonPhoenix {
    fn game_type(&self) -> GameType {
        GameType::DragonPhoenix
    }

    fn parse_result(&self, details: &serde_json::Value) -> Result<HitResult, CalcError> {
        let DragonPhoenixDetails { dragon, phoenix } =
            parse_details(GameType::DragonPhoenix, details)?;
        let dragon = evaluate(&dragon);
        let phoenix = evaluate(&phoenix);
        let mut hits = Vec::with_capacity(3);

        let winner = match compare(&dragon, &phoenix) {
            Ordering::Greater => {
                hits.push(DRAGON);
                dragon
            }
            Ordering::Less => {
                hits.push(PHOENIX);
                phoenix
            }
            Ordering::Equal => {
                hits.push(TIE);
                dragon
            }
        };

        if let Some(marker) = pair_plus_marker(&winner) {
            hits.push(PAIR_PLUS);
            hits.push(marker);
        }
        if dragon.category == Category::Leopard || phoenix.category == Category::Leopard {
            hits.push(LEOPARD);
        }

        Ok(HitResult::from_codes(hits))
    }

    fn calc_win_lose(&self, bets: &BetMap, hits: &HitResult) -> Result<Decimal, CalcError> {
        let tie = hits.contains(TIE);
        let mut total = Decimal::ZERO;
        for (&code, &amount) in bets {
            total += match code {
                DRAGON | PHOENIX if tie => Decimal::ZERO,
                DRAGON | PHOENIX => plain_leg(amount, dec!(1), hits.contains(code)),
                PAIR_PLUS => match pair_plus_odds(hits) {
                    Some(odds) => amount * odds,
                    None => -amount,
                },
                LEOPARD => plain_leg(amount, dec!(20), hits.contains(LEOPARD)),
                other => {
                    return Err(CalcError::UnknownBet {
                        game: GameType::DragonPhoenix,
                        code: other,
                    })
                }
            };
        }
        Ok(total)
    }

    fn calc_rolling(&self, total_bet: Decimal, bets: &BetMap, hits: &HitResult) -> Decimal {
        if hits.contains(TIE) {
            total_bet - stake_on(bets, &[DRAGON, PHOENIX])
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

    fn hand(cards: [Card; 3]) -> HandRank {
        evaluate(&cards)
    }

    fn codes_of(cards: [Card; 3]) -> Vec<u8> {
        cards.iter().map(|c| c.code()).collect()
    }

    #[test]
    fn categories_are_detected() {
        let leopard = hand([card(4, Spade), card(4, Heart), card(4, Club)]);
        assert_eq!(leopard.category, Category::Leopard);

        let sf = hand([card(9, Heart), card(10, Heart), card(11, Heart)]);
        assert_eq!(sf.category, Category::StraightFlush);

        let flush = hand([card(2, Club), card(9, Club), card(13, Club)]);
        assert_eq!(flush.category, Category::Flush);

        let pair = hand([card(12, Club), card(12, Spade), card(3, Heart)]);
        assert_eq!(pair.category, Category::Pair);
        assert_eq!(pair.kickers, [12, 12, 3]);
    }

    #[test]
    fn ace_plays_both_ends_of_a_straight() {
        let wheel = hand([card(1, Spade), card(2, Heart), card(3, Club)]);
        let top = hand([card(1, Club), card(13, Heart), card(12, Diamond)]);
        let low = hand([card(2, Spade), card(3, Heart), card(4, Club)]);
        assert_eq!(wheel.category, Category::Straight);
        assert_eq!(top.category, Category::Straight);
        assert_eq!(compare(&wheel, &low), Ordering::Less);
        assert_eq!(compare(&top, &low), Ordering::Greater);
        assert_eq!(top.kickers, [14, 13, 12]);
    }

    #[test]
    fn mixed_235_only_beats_leopard() {
        let special = hand([card(2, Spade), card(3, Heart), card(5, Club)]);
        let leopard = hand([card(13, Spade), card(13, Heart), card(13, Club)]);
        let pair = hand([card(2, Club), card(2, Diamond), card(4, Club)]);
        assert!(special.special_235);
        assert_eq!(compare(&special, &leopard), Ordering::Greater);
        assert_eq!(compare(&leopard, &special), Ordering::Less);
        assert_eq!(compare(&special, &pair), Ordering::Less);

        let suited = hand([card(2, Spade), card(3, Spade), card(5, Spade)]);
        assert!(!suited.special_235);
        assert_eq!(suited.category, Category::Flush);
    }

    #[test]
    fn pair_plus_follows_winning_hand() {
        let details = json!({
            "dragon": codes_of([card(9, Spade), card(9, Heart), card(2, Club)]),
            "phoenix": codes_of([card(5, Spade), card(8, Heart), card(13, Club)]),
        });
        let hits = DragonPhoenix.parse_result(&details).unwrap();
        assert!(hits.contains(DRAGON));
        assert!(hits.contains(PAIR_PLUS));
        assert!(hits.contains(WIN_PAIR_NINE_UP));

        let bets: BetMap = [(DRAGON, dec!(10)), (PHOENIX, dec!(10)), (PAIR_PLUS, dec!(10))].into();
        assert_eq!(DragonPhoenix.calc_win_lose(&bets, &hits).unwrap(), dec!(10));
    }

    #[test]
    fn equal_hands_push_main_bets() {
        let details = json!({
            "dragon": codes_of([card(9, Spade), card(7, Heart), card(2, Club)]),
            "phoenix": codes_of([card(9, Heart), card(7, Club), card(2, Diamond)]),
        });
        let hits = DragonPhoenix.parse_result(&details).unwrap();
        assert!(hits.contains(TIE));
        let bets: BetMap = [(DRAGON, dec!(10)), (LEOPARD, dec!(5))].into();
        assert_eq!(DragonPhoenix.calc_win_lose(&bets, &hits).unwrap(), dec!(-5));
        assert_eq!(DragonPhoenix.calc_rolling(dec!(15), &bets, &hits), dec!(5));
    }
}
