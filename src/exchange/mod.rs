//! Exchange order protocol integration.
//!
//! Models the order struct the on-chain verifier settles (offer +
//! consideration items), computes the typed-data hashes an off-chain
//! signature must commit to, and encodes the calldata for the verifier's
//! `validate` entry point.

pub mod hash;

use alloy_primitives::{Address, Bytes, B256, U256};

use crate::chain::abi;

// ---------------------------------------------------------------------------
// Item and order kinds
// ---------------------------------------------------------------------------

/// Asset kind of a single offer/consideration item, as the verifier tags it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ItemType {
    Native = 0,
    Erc20 = 1,
    Erc721 = 2,
    Erc1155 = 3,
    Erc721WithCriteria = 4,
    Erc1155WithCriteria = 5,
}

impl ItemType {
    pub fn from_u8(v: u8) -> anyhow::Result<Self> {
        Ok(match v {
            0 => ItemType::Native,
            1 => ItemType::Erc20,
            2 => ItemType::Erc721,
            3 => ItemType::Erc1155,
            4 => ItemType::Erc721WithCriteria,
            5 => ItemType::Erc1155WithCriteria,
            other => anyhow::bail!("unknown item type: {other}"),
        })
    }
}

/// Order restriction/partial-fill class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OrderType {
    FullOpen = 0,
    PartialOpen = 1,
    FullRestricted = 2,
    PartialRestricted = 3,
}

impl OrderType {
    pub fn from_u8(v: u8) -> anyhow::Result<Self> {
        Ok(match v {
            0 => OrderType::FullOpen,
            1 => OrderType::PartialOpen,
            2 => OrderType::FullRestricted,
            3 => OrderType::PartialRestricted,
            other => anyhow::bail!("unknown order type: {other}"),
        })
    }
}

// ---------------------------------------------------------------------------
// Order components
// ---------------------------------------------------------------------------

/// What the offerer gives up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfferItem {
    pub item_type: ItemType,
    pub token: Address,
    pub identifier_or_criteria: U256,
    pub start_amount: U256,
    pub end_amount: U256,
}

/// What the offerer demands, and who receives it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsiderationItem {
    pub item_type: ItemType,
    pub token: Address,
    pub identifier_or_criteria: U256,
    pub start_amount: U256,
    pub end_amount: U256,
    pub recipient: Address,
}

/// The full signed-order record, field order fixed by the verifier's ABI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderComponents {
    pub offerer: Address,
    pub zone: Address,
    pub offer: Vec<OfferItem>,
    pub consideration: Vec<ConsiderationItem>,
    pub order_type: OrderType,
    pub start_time: U256,
    pub end_time: U256,
    pub zone_hash: B256,
    pub salt: U256,
    pub conduit_key: B256,
    /// How many consideration items the offerer originally signed over.
    /// The hash derivation truncates `consideration` to this count.
    pub total_original_consideration_items: usize,
    /// Offerer-scoped counter; incrementing it voids all signed orders.
    pub counter: U256,
}

// ---------------------------------------------------------------------------
// Consideration rescaling
// ---------------------------------------------------------------------------

/// Proportionally rescale `amounts` so they sum exactly to `target_total`.
///
/// Every item keeps its share of the original total (floored); the last
/// item absorbs the rounding remainder so the sum is exact. Returns an
/// empty vector for an empty input; a zero original total cannot be
/// rescaled and errors.
pub fn rescale_amounts(amounts: &[U256], target_total: U256) -> anyhow::Result<Vec<U256>> {
    if amounts.is_empty() {
        return Ok(Vec::new());
    }
    let original_total: U256 = amounts.iter().copied().fold(U256::ZERO, |acc, a| acc + a);
    if original_total.is_zero() {
        anyhow::bail!("cannot rescale consideration with zero original total");
    }

    let mut scaled: Vec<U256> = amounts
        .iter()
        .map(|a| a * target_total / original_total)
        .collect();
    let partial: U256 = scaled[..scaled.len() - 1]
        .iter()
        .copied()
        .fold(U256::ZERO, |acc, a| acc + a);
    // Flooring can only under-shoot, so the remainder is non-negative.
    let last = scaled.len() - 1;
    scaled[last] = target_total - partial;
    Ok(scaled)
}

/// Markup a cost to a listing total: ceil(cost * markup_bps / 10000).
pub fn markup_total(cost: U256, markup_bps: u64) -> U256 {
    let bps = U256::from(10_000u64);
    (cost * U256::from(markup_bps) + bps - U256::from(1)) / bps
}

// ---------------------------------------------------------------------------
// Validate calldata
// ---------------------------------------------------------------------------

/// ABI signature of the verifier's order-validation entry point.
const VALIDATE_SIGNATURE: &str = "validate(((address,address,(uint8,address,uint256,uint256,uint256)[],(uint8,address,uint256,uint256,uint256,address)[],uint8,uint256,uint256,bytes32,uint256,bytes32,uint256),bytes)[])";

/// Encode `validate([Order(parameters, signature)])` calldata for one order.
pub fn encode_validate_call(order: &OrderComponents, signature: &[u8]) -> Bytes {
    let order_enc = encode_order(order, signature);

    let mut data = Vec::with_capacity(4 + 96 + order_enc.len());
    data.extend_from_slice(&abi::selector(VALIDATE_SIGNATURE));
    // Order[] head: offset to the array body.
    data.extend_from_slice(&abi::uint_word(32));
    // Array body: length, then per-element offsets from the element area.
    data.extend_from_slice(&abi::uint_word(1));
    data.extend_from_slice(&abi::uint_word(32));
    data.extend_from_slice(&order_enc);
    Bytes::from(data)
}

/// Encode one Order tuple: (OrderParameters parameters, bytes signature).
fn encode_order(order: &OrderComponents, signature: &[u8]) -> Vec<u8> {
    let params = encode_order_parameters(order);
    let sig = abi::encode_bytes(signature);

    let mut out = Vec::with_capacity(64 + params.len() + sig.len());
    // Both members are dynamic: two offset words, then the tails.
    out.extend_from_slice(&abi::uint_word(64));
    out.extend_from_slice(&abi::uint_word(64 + params.len() as u64));
    out.extend_from_slice(&params);
    out.extend_from_slice(&sig);
    out
}

/// Encode the OrderParameters tuple. The full consideration list is encoded;
/// `totalOriginalConsiderationItems` rides along as the final head word.
fn encode_order_parameters(order: &OrderComponents) -> Vec<u8> {
    let offer = encode_offer_array(&order.offer);
    let consideration = encode_consideration_array(&order.consideration);

    // 11 head words: offerer, zone, offer*, consideration*, orderType,
    // startTime, endTime, zoneHash, salt, conduitKey, totalOriginal.
    let head = 11 * 32u64;
    let mut out = Vec::with_capacity(head as usize + offer.len() + consideration.len());
    out.extend_from_slice(&abi::addr_word(order.offerer));
    out.extend_from_slice(&abi::addr_word(order.zone));
    out.extend_from_slice(&abi::uint_word(head));
    out.extend_from_slice(&abi::uint_word(head + offer.len() as u64));
    out.extend_from_slice(&abi::uint_word(order.order_type as u64));
    out.extend_from_slice(&order.start_time.to_be_bytes::<32>());
    out.extend_from_slice(&order.end_time.to_be_bytes::<32>());
    out.extend_from_slice(order.zone_hash.as_slice());
    out.extend_from_slice(&order.salt.to_be_bytes::<32>());
    out.extend_from_slice(order.conduit_key.as_slice());
    out.extend_from_slice(&abi::uint_word(order.total_original_consideration_items as u64));
    out.extend_from_slice(&offer);
    out.extend_from_slice(&consideration);
    out
}

fn encode_offer_array(items: &[OfferItem]) -> Vec<u8> {
    let mut out = Vec::with_capacity(32 + items.len() * 160);
    out.extend_from_slice(&abi::uint_word(items.len() as u64));
    for item in items {
        out.extend_from_slice(&abi::uint_word(item.item_type as u64));
        out.extend_from_slice(&abi::addr_word(item.token));
        out.extend_from_slice(&item.identifier_or_criteria.to_be_bytes::<32>());
        out.extend_from_slice(&item.start_amount.to_be_bytes::<32>());
        out.extend_from_slice(&item.end_amount.to_be_bytes::<32>());
    }
    out
}

fn encode_consideration_array(items: &[ConsiderationItem]) -> Vec<u8> {
    let mut out = Vec::with_capacity(32 + items.len() * 192);
    out.extend_from_slice(&abi::uint_word(items.len() as u64));
    for item in items {
        out.extend_from_slice(&abi::uint_word(item.item_type as u64));
        out.extend_from_slice(&abi::addr_word(item.token));
        out.extend_from_slice(&item.identifier_or_criteria.to_be_bytes::<32>());
        out.extend_from_slice(&item.start_amount.to_be_bytes::<32>());
        out.extend_from_slice(&item.end_amount.to_be_bytes::<32>());
        out.extend_from_slice(&abi::addr_word(item.recipient));
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;

    fn u(v: u64) -> U256 {
        U256::from(v)
    }

    #[test]
    fn test_rescale_conserves_target_total() {
        let cases: Vec<(Vec<u64>, u64)> = vec![
            (vec![975, 25], 1300),
            (vec![333, 333, 334], 1000),
            (vec![1, 1, 1], 100),
            (vec![7], 13),
            (vec![999_999, 1], 1),
        ];
        for (amounts, target) in cases {
            let input: Vec<U256> = amounts.iter().map(|a| u(*a)).collect();
            let scaled = rescale_amounts(&input, u(target)).unwrap();
            let sum: U256 = scaled.iter().copied().fold(U256::ZERO, |a, b| a + b);
            assert_eq!(sum, u(target), "amounts {amounts:?} target {target}");
        }
    }

    #[test]
    fn test_rescale_remainder_goes_to_last_item() {
        // 3 equal shares of 100: floor gives 33 each, last absorbs the +1.
        let scaled = rescale_amounts(&[u(1), u(1), u(1)], u(100)).unwrap();
        assert_eq!(scaled, vec![u(33), u(33), u(34)]);
    }

    #[test]
    fn test_rescale_preserves_proportions() {
        // 97.5% / 2.5% split of 1200 rescaled to 1300.
        let scaled = rescale_amounts(&[u(1170), u(30)], u(1300)).unwrap();
        assert_eq!(scaled[0], u(1267)); // floor(1170 * 1300 / 1200)
        assert_eq!(scaled[1], u(33)); // 1300 - 1267
    }

    #[test]
    fn test_rescale_rejects_zero_total() {
        assert!(rescale_amounts(&[u(0), u(0)], u(100)).is_err());
        assert!(rescale_amounts(&[], u(100)).unwrap().is_empty());
    }

    #[test]
    fn test_markup_rounds_up() {
        // 1200 * 10833 / 10000 = 1299.96 → 1300.
        assert_eq!(markup_total(u(1200), 10_833), u(1300));
        // Exact multiples do not round.
        assert_eq!(markup_total(u(1000), 12_000), u(1200));
        assert_eq!(markup_total(u(1), 10_001), u(2));
    }

    #[test]
    fn test_validate_calldata_layout() {
        let order = OrderComponents {
            offerer: address!("1111111111111111111111111111111111111111"),
            zone: Address::ZERO,
            offer: vec![OfferItem {
                item_type: ItemType::Erc721,
                token: address!("2222222222222222222222222222222222222222"),
                identifier_or_criteria: u(7),
                start_amount: u(1),
                end_amount: u(1),
            }],
            consideration: vec![ConsiderationItem {
                item_type: ItemType::Native,
                token: Address::ZERO,
                identifier_or_criteria: U256::ZERO,
                start_amount: u(1300),
                end_amount: u(1300),
                recipient: address!("1111111111111111111111111111111111111111"),
            }],
            order_type: OrderType::FullOpen,
            start_time: u(1_000),
            end_time: u(2_000),
            zone_hash: B256::ZERO,
            salt: u(42),
            conduit_key: B256::ZERO,
            total_original_consideration_items: 1,
            counter: U256::ZERO,
        };
        let sig = [0u8; 65];
        let data = encode_validate_call(&order, &sig);

        assert_eq!(&data[..4], &abi::selector(VALIDATE_SIGNATURE));
        // Array head offset, length 1, element offset.
        assert_eq!(U256::from_be_slice(&data[4..36]), u(32));
        assert_eq!(U256::from_be_slice(&data[36..68]), u(1));
        assert_eq!(U256::from_be_slice(&data[68..100]), u(32));
        // Order head: parameters at 0x40, signature offset beyond them.
        assert_eq!(U256::from_be_slice(&data[100..132]), u(64));
        let sig_offset = U256::from_be_slice(&data[132..164]);
        // 11 head words + offer (1 + 5 words) + consideration (1 + 6 words).
        let params_len: usize = (11 + 6 + 7) * 32;
        assert_eq!(sig_offset, u(64 + params_len as u64));
        // Signature tail: length word + 65 bytes padded to 96.
        let sig_start = 100 + 64 + params_len;
        assert_eq!(U256::from_be_slice(&data[sig_start..sig_start + 32]), u(65));
        assert_eq!(data.len(), sig_start + 32 + 96);
    }
}
