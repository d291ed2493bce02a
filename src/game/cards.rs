//! Playing-card encoding shared by the card games.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::CalcError;

/// Card code 1..=52.
/// 1-13: Spades (A-K)
/// 14-26: Hearts (A-K)
/// 27-39: Clubs (A-K)
/// 40-52: Diamonds (A-K)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Card(u8);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Suit {
    Spade = 0,
    Heart = 1,
    Club = 2,
    Diamond = 3,
}

impl Card {
    pub fn new(code: u8) -> Result<Self, CalcError> {
        if (1..=52).contains(&code) {
            Ok(Self(code))
        } else {
            Err(CalcError::invalid(format!("card code {code} out of range")))
        }
    }

    pub fn from_parts(rank: u8, suit: Suit) -> Result<Self, CalcError> {
        if !(1..=13).contains(&rank) {
            return Err(CalcError::invalid(format!("card rank {rank} out of range")));
        }
        Self::new(suit as u8 * 13 + rank)
    }

    pub fn code(self) -> u8 {
        self.0
    }

    /// Rank 1..=13 (ace low, king high).
    pub fn rank(self) -> u8 {
        (self.0 - 1) % 13 + 1
    }

    pub fn suit(self) -> Suit {
        match (self.0 - 1) / 13 {
            0 => Suit::Spade,
            1 => Suit::Heart,
            2 => Suit::Club,
            _ => Suit::Diamond,
        }
    }

    pub fn is_red(self) -> bool {
        matches!(self.suit(), Suit::Heart | Suit::Diamond)
    }

    /// Baccarat point: tens and faces count zero.
    pub fn baccarat_point(self) -> u8 {
        let rank = self.rank();
        if rank >= 10 {
            0
        } else {
            rank
        }
    }

    /// Bull point: faces count ten.
    pub fn bull_point(self) -> u8 {
        self.rank().min(10)
    }

    pub fn is_face(self) -> bool {
        self.rank() > 10
    }
}

impl TryFrom<u8> for Card {
    type Error = CalcError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Card::new(value)
    }
}

impl From<Card> for u8 {
    fn from(card: Card) -> Self {
        card.0
    }
}

impl fmt::Display for Card {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ranks = ["A", "2", "3", "4", "5", "6", "7", "8", "9", "10", "J", "Q", "K"];
        let suits = ["♠", "♥", "♣", "♦"];
        write!(
            f,
            "{}{}",
            ranks[usize::from(self.rank() - 1)],
            suits[self.suit() as usize]
        )
    }
}

#[cfg(test)]
pub(crate) fn card(rank: u8, suit: Suit) -> Card {
    Card::from_parts(rank, suit).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rank_and_suit_follow_the_code_layout() {
        let king_spades = Card::new(13).unwrap();
        assert_eq!(king_spades.rank(), 13);
        assert_eq!(king_spades.suit(), Suit::Spade);

        let ace_hearts = Card::new(14).unwrap();
        assert_eq!(ace_hearts.rank(), 1);
        assert_eq!(ace_hearts.suit(), Suit::Heart);
        assert!(ace_hearts.is_red());

        let king_diamonds = Card::new(52).unwrap();
        assert_eq!(king_diamonds.rank(), 13);
        assert_eq!(king_diamonds.suit(), Suit::Diamond);
    }

    #[test]
    fn out_of_range_codes_are_rejected() {
        assert!(Card::new(0).is_err());
        assert!(Card::new(53).is_err());
        assert!(serde_json::from_str::<Card>("60").is_err());
    }

    #[test]
    fn points_per_game() {
        assert_eq!(card(13, Suit::Club).baccarat_point(), 0);
        assert_eq!(card(10, Suit::Club).baccarat_point(), 0);
        assert_eq!(card(9, Suit::Club).baccarat_point(), 9);
        assert_eq!(card(12, Suit::Heart).bull_point(), 10);
        assert_eq!(card(1, Suit::Heart).bull_point(), 1);
    }

    #[test]
    fn display_uses_rank_and_suit_symbol() {
        assert_eq!(card(10, Suit::Diamond).to_string(), "10♦");
        assert_eq!(card(1, Suit::Spade).to_string(), "A♠");
    }
}
