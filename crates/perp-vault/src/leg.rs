//! The vault's two symmetric legs.

use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Leg {
    Long,
    Short,
}

impl Leg {
    pub const BOTH: [Leg; 2] = [Leg::Long, Leg::Short];
}

/// One value per leg.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Legs<T> {
    pub long: T,
    pub short: T,
}

impl<T: Copy> Legs<T> {
    pub fn new(long: T, short: T) -> Self {
        Legs { long, short }
    }

    pub fn get(&self, leg: Leg) -> T {
        match leg {
            Leg::Long => self.long,
            Leg::Short => self.short,
        }
    }
}
