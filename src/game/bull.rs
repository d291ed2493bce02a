//! Bull (Niuniu): banker against three player seats, five cards each.
//!
//! Bet codes per seat `s` in 1..=3:
//! 10s+1 = Equal: win 0.95, lose the stake
//! 10s+2 = Double: win 0.95 × player multiplier, lose banker multiplier × stake
//!
//! Hit markers: 10s when seat `s` beats the banker, 100s+m with the
//! multiplier `m` of the hand that decided seat `s`.

use std::cmp::Ordering;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;

use super::{parse_details, BetCode, BetMap, CalcError, Card, GameType, HitResult, OddsCalculator};

pub const SEATS: [u8; 3] = [1, 2, 3];

pub mod codes {
    use super::BetCode;

    pub const fn seat_win(seat: u8) -> BetCode {
        seat as BetCode * 10
    }

    pub const fn equal(seat: u8) -> BetCode {
        seat as BetCode * 10 + 1
    }

    pub const fn double(seat: u8) -> BetCode {
        seat as BetCode * 10 + 2
    }

    pub const fn multiplier(seat: u8, mult: u8) -> BetCode {
        seat as BetCode * 100 + mult as BetCode
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct BullDetails {
    pub banker: [Card; 5],
    pub player1: [Card; 5],
    pub player2: [Card; 5],
    pub player3: [Card; 5],
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Category {
    NoBull,
    /// Bull 1..=9.
    Bull(u8),
    BullBull,
    FiveFlowers,
    Bomb,
    FiveSmall,
}

impl Category {
    pub fn multiplier(self) -> u8 {
        match self {
            Category::NoBull => 1,
            Category::Bull(k) if k <= 6 => 1,
            Category::Bull(_) => 2,
            Category::BullBull => 3,
            Category::FiveFlowers | Category::Bomb | Category::FiveSmall => 5,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BullHand {
    pub category: Category,
    pub top_card: Card,
}

fn bull_value(hand: &[Card; 5]) -> Category {
    let points = (*hand).map(Card::bull_point);
    let total: u32 = points.iter().map(|p| u32::from(*p)).sum();
    let mut best: Option<u8> = None;

    for i in 0..5 {
        for j in i + 1..5 {
            for k in j + 1..5 {
                let three = u32::from(points[i]) + u32::from(points[j]) + u32::from(points[k]);
                if three % 10 != 0 {
                    continue;
                }
                let rest = ((total - three) % 10) as u8;
                let value = if rest == 0 { 10 } else { rest };
                best = best.max(Some(value));
            }
        }
    }

    match best {
        None => Category::NoBull,
        Some(10) => Category::BullBull,
        Some(k) => Category::Bull(k),
    }
}

fn is_bomb(hand: &[Card; 5]) -> bool {
    hand.iter()
        .any(|card| hand.iter().filter(|other| other.rank() == card.rank()).count() >= 4)
}

/// The biggest card: highest rank, then the smaller suit index.
fn top_card(hand: &[Card; 5]) -> Card {
    let mut top = hand[0];
    for &card in &hand[1..] {
        if card.rank() > top.rank() || (card.rank() == top.rank() && card.suit() < top.suit()) {
            top = card;
        }
    }
    top
}

pub fn evaluate(hand: &[Card; 5]) -> BullHand {
    let ranks_sum: u32 = hand.iter().map(|c| u32::from(c.rank())).sum();
    let category = if hand.iter().all(|c| c.rank() <= 5) && ranks_sum <= 10 {
        Category::FiveSmall
    } else if is_bomb(hand) {
        Category::Bomb
    } else if hand.iter().all(|c| c.is_face()) {
        Category::FiveFlowers
    } else {
        bull_value(hand)
    };
    BullHand {
        category,
        top_card: top_card(hand),
    }
}

/// Whether the player hand beats the banker hand.
///
/// Equal categories fall back to the top card, where a smaller suit index
/// counts as bigger. Hands that are equal all the way go to the banker.
pub fn player_wins(banker: &BullHand, player: &BullHand) -> bool {
    match player.category.cmp(&banker.category) {
        Ordering::Greater => true,
        Ordering::Less => false,
        Ordering::Equal => {
            let (p, b) = (player.top_card, banker.top_card);
            match p.rank().cmp(&b.rank()) {
                Ordering::Greater => true,
                Ordering::Less => false,
                Ordering::Equal => p.suit() < b.suit(),
            }
        }
    }
}

fn seat_from_code(code: BetCode) -> Option<(u8, BetCode)> {
    let seat = code / 10;
    let kind = code % 10;
    if (1..=3).contains(&seat) && (kind == 1 || kind == 2) {
        Some((seat as u8, kind))
    } else {
        None
    }
}

fn seat_multiplier(hits: &HitResult, seat: u8) -> Option<Decimal> {
    (1..=5u8)
        .find(|m| hits.contains(codes::multiplier(seat, *m)))
        .map(Decimal::from)
}

pub struct Bull;

impl OddsCalculator for Bull {
    fn game_type(&self) -> GameType {
        GameType::Bull
    }

    fn parse_result(&self, details: &serde_json::Value) -> Result<HitResult, CalcError> {
        let details: BullDetails = parse_details(GameType::Bull, details)?;
        let banker = evaluate(&details.banker);
        let players = [details.player1, details.player2, details.player3];
        let mut hits = Vec::with_capacity(6);

        for (seat, cards) in SEATS.into_iter().zip(players.iter()) {
            let player = evaluate(cards);
            let deciding = if player_wins(&banker, &player) {
                hits.push(codes::seat_win(seat));
                player
            } else {
                banker
            };
            hits.push(codes::multiplier(seat, deciding.category.multiplier()));
        }

        Ok(HitResult::from_codes(hits))
    }

    fn calc_win_lose(&self, bets: &BetMap, hits: &HitResult) -> Result<Decimal, CalcError> {
        let mut total = Decimal::ZERO;
        for (&code, &amount) in bets {
            let unknown = CalcError::UnknownBet {
                game: GameType::Bull,
                code,
            };
            let (seat, kind) = seat_from_code(code).ok_or(unknown)?;
            let won = hits.contains(codes::seat_win(seat));
            total += match (kind, won) {
                (1, true) => amount * dec!(0.95),
                (1, false) => -amount,
                (_, won) => {
                    let mult = seat_multiplier(hits, seat).ok_or_else(|| {
                        CalcError::invalid(format!("bull seat {seat} has no multiplier marker"))
                    })?;
                    if won {
                        amount * dec!(0.95) * mult
                    } else {
                        -amount * mult
                    }
                }
            };
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
    use crate::game::cards::card;
    use crate::game::Suit::*;
    use serde_json::json;

    fn hand(cards: [Card; 5]) -> BullHand {
        evaluate(&cards)
    }

    fn codes_of(cards: [Card; 5]) -> Vec<u8> {
        cards.iter().map(|c| c.code()).collect()
    }

    #[test]
    fn numeric_bull_takes_best_split() {
        // 3+7+K = 20, remaining 5+4 = 9
        let h = hand([card(3, Spade), card(7, Heart), card(13, Club), card(5, Club), card(4, Heart)]);
        assert_eq!(h.category, Category::Bull(9));
        assert_eq!(h.category.multiplier(), 2);

        let none = hand([card(1, Spade), card(2, Heart), card(4, Club), card(9, Club), card(3, Heart)]);
        assert_eq!(none.category, Category::NoBull);

        let bull_bull = hand([card(10, Spade), card(11, Heart), card(12, Club), card(4, Club), card(6, Heart)]);
        assert_eq!(bull_bull.category, Category::BullBull);
        assert_eq!(bull_bull.category.multiplier(), 3);
    }

    #[test]
    fn special_hands_outrank_numeric_ones() {
        let five_small = hand([card(1, Spade), card(1, Heart), card(2, Club), card(3, Club), card(2, Heart)]);
        let bomb = hand([card(8, Spade), card(8, Heart), card(8, Club), card(8, Diamond), card(2, Heart)]);
        let flowers = hand([card(11, Spade), card(12, Heart), card(13, Club), card(11, Club), card(12, Diamond)]);
        assert_eq!(five_small.category, Category::FiveSmall);
        assert_eq!(bomb.category, Category::Bomb);
        assert_eq!(flowers.category, Category::FiveFlowers);
        assert!(five_small.category > bomb.category);
        assert!(bomb.category > flowers.category);
        assert!(flowers.category > Category::BullBull);
    }

    /// Equal rank is broken by suit, with the smaller suit index ranking
    /// higher. This is kept as-is even though it reads backwards from the
    /// usual "bigger index wins" intuition.
    #[test]
    fn equal_rank_tie_break_prefers_smaller_suit_index() {
        let banker = hand([card(13, Heart), card(3, Club), card(7, Club), card(2, Heart), card(4, Diamond)]);
        let player = hand([card(13, Spade), card(3, Heart), card(7, Diamond), card(2, Club), card(4, Club)]);
        assert_eq!(banker.category, player.category);
        assert!(player_wins(&banker, &player));
        assert!(!player_wins(&player, &banker));

        // identical category and top card: banker keeps it
        assert!(!player_wins(&player, &player));
    }

    #[test]
    fn settles_equal_and_double_per_seat() {
        let banker = [card(3, Spade), card(7, Heart), card(13, Club), card(2, Club), card(4, Heart)]; // bull 6
        let strong = [card(3, Heart), card(7, Club), card(13, Diamond), card(5, Club), card(4, Club)]; // bull 9
        let weak = [card(1, Spade), card(2, Heart), card(4, Club), card(9, Club), card(3, Heart)]; // no bull
        let details = json!({
            "banker": codes_of(banker),
            "player1": codes_of(strong),
            "player2": codes_of(weak),
            "player3": codes_of(weak),
        });
        let hits = Bull.parse_result(&details).unwrap();
        assert!(hits.contains(codes::seat_win(1)));
        assert!(hits.contains(codes::multiplier(1, 2)));
        assert!(!hits.contains(codes::seat_win(2)));
        assert!(hits.contains(codes::multiplier(2, 1)));

        let bets: BetMap = [
            (codes::equal(1), dec!(100)),
            (codes::double(1), dec!(100)),
            (codes::equal(2), dec!(100)),
            (codes::double(2), dec!(100)),
        ]
        .into();
        // 95 + 190 - 100 - 100
        assert_eq!(Bull.calc_win_lose(&bets, &hits).unwrap(), dec!(85));
    }

    #[test]
    fn unknown_seat_code_is_rejected() {
        let hits = HitResult::from_codes([10, 102]);
        let bets: BetMap = [(43, dec!(1))].into();
        assert!(matches!(
            Bull.calc_win_lose(&bets, &hits),
            Err(CalcError::UnknownBet { code: 43, .. })
        ));
    }
}
