//! Color draw rule table
//!
//! Number to color: 0 and 5 are violet, odd numbers green, even numbers red.
//! Size: 5 and above is big.

use crate::games::types::{Amount, Multiplier};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    Green,
    Red,
    Violet,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Size {
    Big,
    Small,
}

/// What a color bet is placed on
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum ColorSelection {
    Color(Color),
    Number(u8),
    Size(Size),
}

/// Full color wager: the selection plus the stake multiplier picked from the
/// configured set. The debited stake is `amount * multiplier`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ColorWager {
    pub selection: ColorSelection,
    #[serde(default = "default_stake_multiplier")]
    pub multiplier: u32,
}

fn default_stake_multiplier() -> u32 {
    1
}

const COLOR_PAYOUT: Multiplier = Multiplier(200);
const VIOLET_PAYOUT: Multiplier = Multiplier(450);
const NUMBER_PAYOUT: Multiplier = Multiplier(900);
const SIZE_PAYOUT: Multiplier = Multiplier(200);

pub fn color_of(number: u8) -> Color {
    match number {
        0 | 5 => Color::Violet,
        1 | 3 | 7 | 9 => Color::Green,
        _ => Color::Red,
    }
}

pub fn size_of(number: u8) -> Size {
    if number >= 5 {
        Size::Big
    } else {
        Size::Small
    }
}

impl ColorWager {
    pub fn validate(&self) -> Result<(), String> {
        if self.multiplier == 0 {
            return Err("stake multiplier must be at least 1".to_string());
        }
        if let ColorSelection::Number(n) = self.selection {
            if n > 9 {
                return Err(format!("number {} out of range 0-9", n));
            }
        }
        Ok(())
    }

    /// Payout rate when this selection wins against `winning_number`
    pub fn winning_rate(&self, winning_number: u8) -> Option<Multiplier> {
        match self.selection {
            ColorSelection::Color(color) if color == color_of(winning_number) => {
                Some(if color == Color::Violet {
                    VIOLET_PAYOUT
                } else {
                    COLOR_PAYOUT
                })
            }
            ColorSelection::Number(n) if n == winning_number => Some(NUMBER_PAYOUT),
            ColorSelection::Size(size) if size == size_of(winning_number) => Some(SIZE_PAYOUT),
            _ => None,
        }
    }

    /// Total stake for a base `amount`; `None` on overflow
    pub fn stake(&self, amount: Amount) -> Option<Amount> {
        amount.checked_mul(self.multiplier as u64)
    }

    /// `stake * rate` on a win, otherwise 0
    pub fn payout(&self, stake: Amount, winning_number: u8) -> Amount {
        match self.winning_rate(winning_number) {
            Some(rate) => rate.apply(stake),
            None => 0,
        }
    }
}

impl fmt::Display for ColorSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColorSelection::Color(c) => write!(f, "color:{:?}", c),
            ColorSelection::Number(n) => write!(f, "number:{}", n),
            ColorSelection::Size(s) => write!(f, "size:{:?}", s),
        }
    }
}
