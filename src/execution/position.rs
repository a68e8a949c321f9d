//! Single-position book keeping

use rust_decimal::Decimal;
use serde::Serialize;

use super::rest::OrderSide;
use crate::signal::Decision;

/// Side of the open position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PositionSide {
    None,
    Long,
    Short,
}

impl PositionSide {
    /// Order side that opens this position
    pub fn open_side(&self) -> Option<OrderSide> {
        match self {
            PositionSide::Long => Some(OrderSide::Buy),
            PositionSide::Short => Some(OrderSide::Sell),
            PositionSide::None => None,
        }
    }

    /// Order side that flattens this position
    pub fn close_side(&self) -> Option<OrderSide> {
        match self {
            PositionSide::Long => Some(OrderSide::Sell),
            PositionSide::Short => Some(OrderSide::Buy),
            PositionSide::None => None,
        }
    }
}

impl From<Decision> for PositionSide {
    fn from(decision: Decision) -> Self {
        match decision {
            Decision::Long => PositionSide::Long,
            Decision::Short => PositionSide::Short,
            Decision::Hold => PositionSide::None,
        }
    }
}

/// Current exposure. `side == None` implies zero size and no entry price;
/// only the execution coordinator mutates it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionState {
    side: PositionSide,
    entry_price: Option<Decimal>,
    size: Decimal,
    order_id: Option<String>,
}

impl Default for PositionState {
    fn default() -> Self {
        Self::flat()
    }
}

impl PositionState {
    pub fn flat() -> Self {
        Self {
            side: PositionSide::None,
            entry_price: None,
            size: Decimal::ZERO,
            order_id: None,
        }
    }

    pub fn side(&self) -> PositionSide {
        self.side
    }

    pub fn entry_price(&self) -> Option<Decimal> {
        self.entry_price
    }

    pub fn size(&self) -> Decimal {
        self.size
    }

    pub fn order_id(&self) -> Option<&str> {
        self.order_id.as_deref()
    }

    pub fn is_open(&self) -> bool {
        self.side != PositionSide::None
    }

    pub(crate) fn open(
        &mut self,
        side: PositionSide,
        entry_price: Decimal,
        size: Decimal,
        order_id: String,
    ) {
        if side == PositionSide::None || size <= Decimal::ZERO {
            self.clear();
            return;
        }
        self.side = side;
        self.entry_price = Some(entry_price);
        self.size = size;
        self.order_id = Some(order_id);
    }

    pub(crate) fn clear(&mut self) {
        *self = Self::flat();
    }

    /// Fractional move from entry in the position's favour
    pub fn unrealized_return(&self, mark: Decimal) -> Option<Decimal> {
        let entry = self.entry_price?;
        if entry.is_zero() {
            return None;
        }
        let change = (mark - entry) / entry;
        match self.side {
            PositionSide::Long => Some(change),
            PositionSide::Short => Some(-change),
            PositionSide::None => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_flat_invariant() {
        let mut position = PositionState::flat();
        assert!(!position.is_open());
        assert_eq!(position.size(), Decimal::ZERO);
        assert_eq!(position.entry_price(), None);

        position.open(PositionSide::Long, dec!(100), dec!(0.5), "abc".into());
        assert!(position.is_open());
        assert_eq!(position.order_id(), Some("abc"));

        position.clear();
        assert_eq!(position, PositionState::flat());
    }

    #[test]
    fn test_opening_with_none_side_stays_flat() {
        let mut position = PositionState::flat();
        position.open(PositionSide::None, dec!(100), dec!(1), "x".into());
        assert_eq!(position, PositionState::flat());
        position.open(PositionSide::Short, dec!(100), dec!(0), "x".into());
        assert_eq!(position, PositionState::flat());
    }

    #[test]
    fn test_unrealized_return_by_side() {
        let mut position = PositionState::flat();
        position.open(PositionSide::Short, dec!(100), dec!(1), "s".into());
        assert_eq!(position.unrealized_return(dec!(99)), Some(dec!(0.01)));
        position.open(PositionSide::Long, dec!(100), dec!(1), "l".into());
        assert_eq!(position.unrealized_return(dec!(99)), Some(dec!(-0.01)));
    }

    #[test]
    fn test_sides() {
        assert_eq!(PositionSide::from(Decision::Long).open_side(), Some(OrderSide::Buy));
        assert_eq!(PositionSide::Short.close_side(), Some(OrderSide::Buy));
        assert_eq!(PositionSide::None.open_side(), None);
    }
}
