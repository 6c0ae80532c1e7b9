use crate::error::AccountingError;
use core_types::{Position, TradeSide};
use rust_decimal::Decimal;

/// Computes the position a user is left with after one trade.
///
/// This is the whole holding lifecycle in one pure transition:
/// - `None` + buy opens a position at the trade price,
/// - `Some` + buy adds to it at the weighted average cost,
/// - sell reduces the quantity and keeps the average cost of the remaining units,
/// - a sell that empties the position returns `None`, meaning the holding must be deleted.
///
/// It never touches storage; the caller persists the result.
pub fn apply(
    existing: Option<Position>,
    side: TradeSide,
    quantity: Decimal,
    price: Decimal,
) -> Result<Option<Position>, AccountingError> {
    if quantity <= Decimal::ZERO {
        return Err(AccountingError::NonPositiveQuantity(quantity));
    }
    if price <= Decimal::ZERO {
        return Err(AccountingError::NonPositivePrice(price));
    }

    match side {
        TradeSide::Buy => buy(existing, quantity, price).map(Some),
        TradeSide::Sell => sell(existing, quantity),
    }
}

fn buy(
    existing: Option<Position>,
    quantity: Decimal,
    price: Decimal,
) -> Result<Position, AccountingError> {
    let Some(position) = existing else {
        return Ok(Position::new(quantity, price));
    };

    let overflow = || {
        AccountingError::Overflow(format!(
            "adding {} @ {} to {} @ {}",
            quantity, price, position.quantity, position.average_price
        ))
    };

    let existing_value = position
        .quantity
        .checked_mul(position.average_price)
        .ok_or_else(overflow)?;
    let new_value = quantity.checked_mul(price).ok_or_else(overflow)?;
    let total_quantity = exact_add(position.quantity, quantity).ok_or_else(|| {
        AccountingError::Imprecise(format!("{} + {} units", position.quantity, quantity))
    })?;
    let average_price = existing_value
        .checked_add(new_value)
        .and_then(|value| value.checked_div(total_quantity))
        .ok_or_else(overflow)?;

    Ok(Position::new(total_quantity, average_price))
}

fn sell(existing: Option<Position>, quantity: Decimal) -> Result<Option<Position>, AccountingError> {
    let available = existing.map_or(Decimal::ZERO, |p| p.quantity);
    let Some(position) = existing.filter(|p| p.quantity >= quantity) else {
        return Err(AccountingError::InsufficientHolding {
            requested: quantity,
            available,
        });
    };

    let remaining = exact_sub(position.quantity, quantity).ok_or_else(|| {
        AccountingError::Imprecise(format!("{} - {} units", position.quantity, quantity))
    })?;
    if remaining.is_zero() {
        return Ok(None);
    }
    Ok(Some(Position::new(remaining, position.average_price)))
}

/// `a + b`, or `None` when the sum is out of range or had to be rounded.
pub(crate) fn exact_add(a: Decimal, b: Decimal) -> Option<Decimal> {
    let sum = a.checked_add(b)?;
    (sum.checked_sub(a)? == b).then_some(sum)
}

/// `a - b`, or `None` when the difference is out of range or had to be rounded.
pub(crate) fn exact_sub(a: Decimal, b: Decimal) -> Option<Decimal> {
    let difference = a.checked_sub(b)?;
    (a.checked_sub(difference)? == b).then_some(difference)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn first_buy_opens_position_at_trade_price() {
        let position = apply(None, TradeSide::Buy, dec!(2), dec!(100)).unwrap();
        assert_eq!(position, Some(Position::new(dec!(2), dec!(100))));
    }

    #[test]
    fn buy_into_position_uses_weighted_average_cost() {
        let existing = Position::new(dec!(2), dec!(100));
        let position = apply(Some(existing), TradeSide::Buy, dec!(2), dec!(150))
            .unwrap()
            .unwrap();
        assert_eq!(position.quantity, dec!(4));
        assert_eq!(position.average_price, dec!(125));
    }

    #[test]
    fn uneven_buys_weight_by_quantity() {
        let existing = Position::new(dec!(1), dec!(10));
        let position = apply(Some(existing), TradeSide::Buy, dec!(3), dec!(30))
            .unwrap()
            .unwrap();
        // (1 * 10 + 3 * 30) / 4
        assert_eq!(position.average_price, dec!(25));
        assert_eq!(position.cost_basis(), dec!(100));
    }

    #[test]
    fn partial_sell_keeps_average_price() {
        let existing = Position::new(dec!(4), dec!(125));
        let position = apply(Some(existing), TradeSide::Sell, dec!(1.5), dec!(999))
            .unwrap()
            .unwrap();
        assert_eq!(position.quantity, dec!(2.5));
        assert_eq!(position.average_price, dec!(125));
    }

    #[test]
    fn full_sell_liquidates_position() {
        let existing = Position::new(dec!(4), dec!(125));
        assert_eq!(apply(Some(existing), TradeSide::Sell, dec!(4), dec!(200)).unwrap(), None);
    }

    #[test]
    fn over_sell_is_rejected() {
        let existing = Position::new(dec!(1), dec!(50));
        let err = apply(Some(existing), TradeSide::Sell, dec!(1.0001), dec!(50)).unwrap_err();
        assert_eq!(
            err,
            AccountingError::InsufficientHolding {
                requested: dec!(1.0001),
                available: dec!(1),
            }
        );
    }

    #[test]
    fn sell_without_position_is_rejected() {
        let err = apply(None, TradeSide::Sell, dec!(1), dec!(50)).unwrap_err();
        assert_eq!(
            err,
            AccountingError::InsufficientHolding {
                requested: dec!(1),
                available: Decimal::ZERO,
            }
        );
    }

    #[test]
    fn non_positive_inputs_are_rejected() {
        assert!(matches!(
            apply(None, TradeSide::Buy, Decimal::ZERO, dec!(1)),
            Err(AccountingError::NonPositiveQuantity(_))
        ));
        assert!(matches!(
            apply(None, TradeSide::Buy, dec!(1), dec!(-5)),
            Err(AccountingError::NonPositivePrice(_))
        ));
    }

    #[test]
    fn overflowing_buy_is_reported() {
        let existing = Position::new(Decimal::MAX, dec!(2));
        assert!(matches!(
            apply(Some(existing), TradeSide::Buy, dec!(1), dec!(1)),
            Err(AccountingError::Overflow(_))
        ));
    }

    #[test]
    fn sells_too_small_to_register_are_rejected() {
        // 1e10 - 1e-20 needs 31 significant digits and would round back to 1e10.
        let existing = Position::new(dec!(10000000000), dec!(1));
        assert!(matches!(
            apply(Some(existing), TradeSide::Sell, dec!(0.00000000000000000001), dec!(1)),
            Err(AccountingError::Imprecise(_))
        ));
    }

    #[test]
    fn buys_too_small_to_register_are_rejected() {
        let existing = Position::new(dec!(10000000000), dec!(1));
        assert!(matches!(
            apply(Some(existing), TradeSide::Buy, dec!(0.00000000000000000001), dec!(1)),
            Err(AccountingError::Imprecise(_))
        ));
    }

    #[test]
    fn exact_helpers_detect_rounding() {
        assert_eq!(exact_sub(dec!(10), dec!(0.5)), Some(dec!(9.5)));
        assert_eq!(exact_add(dec!(10), dec!(0.5)), Some(dec!(10.5)));
        assert_eq!(exact_sub(dec!(10000), dec!(0.0000000000000000000000000001)), None);
        assert_eq!(exact_add(dec!(10000), dec!(0.0000000000000000000000000001)), None);
    }
}
