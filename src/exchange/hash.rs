//! Typed-data order hashing.
//!
//! Derives the EIP-712 struct hash and signing digest for an exchange
//! order, bit-exact with the on-chain verifier's own derivation so that an
//! off-chain signature verifies during settlement. Pure and deterministic.

use alloy_primitives::{keccak256, Address, B256, U256};

use super::{ConsiderationItem, OfferItem, OrderComponents};
use crate::chain::abi::addr_word;

/// Protocol name baked into the domain separator.
const PROTOCOL_NAME: &str = "Seaport";
/// Protocol version baked into the domain separator.
const PROTOCOL_VERSION: &str = "1.6";

const EIP712_DOMAIN_TYPE: &str =
    "EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)";

const OFFER_ITEM_TYPE: &str = "OfferItem(\
uint8 itemType,\
address token,\
uint256 identifierOrCriteria,\
uint256 startAmount,\
uint256 endAmount\
)";

const CONSIDERATION_ITEM_TYPE: &str = "ConsiderationItem(\
uint8 itemType,\
address token,\
uint256 identifierOrCriteria,\
uint256 startAmount,\
uint256 endAmount,\
address recipient\
)";

/// The order type string is followed by its referenced struct types in
/// alphabetical order, per the typed-data spec.
const ORDER_COMPONENTS_TYPE: &str = "OrderComponents(\
address offerer,\
address zone,\
OfferItem[] offer,\
ConsiderationItem[] consideration,\
uint8 orderType,\
uint256 startTime,\
uint256 endTime,\
bytes32 zoneHash,\
uint256 salt,\
bytes32 conduitKey,\
uint256 counter\
)";

// ---------------------------------------------------------------------------
// Order hasher
// ---------------------------------------------------------------------------

/// Precomputed type hashes plus the domain separator for one deployment of
/// the verifier contract.
#[derive(Debug, Clone)]
pub struct OrderHasher {
    offer_item_type_hash: B256,
    consideration_item_type_hash: B256,
    order_type_hash: B256,
    domain_separator: B256,
}

impl OrderHasher {
    pub fn new(chain_id: u64, verifying_contract: Address) -> Self {
        let offer_item_type_hash = keccak256(OFFER_ITEM_TYPE.as_bytes());
        let consideration_item_type_hash = keccak256(CONSIDERATION_ITEM_TYPE.as_bytes());
        let order_type_hash = keccak256(
            [
                ORDER_COMPONENTS_TYPE,
                CONSIDERATION_ITEM_TYPE,
                OFFER_ITEM_TYPE,
            ]
            .concat()
            .as_bytes(),
        );

        let mut enc = Vec::with_capacity(5 * 32);
        enc.extend_from_slice(keccak256(EIP712_DOMAIN_TYPE.as_bytes()).as_slice());
        enc.extend_from_slice(keccak256(PROTOCOL_NAME.as_bytes()).as_slice());
        enc.extend_from_slice(keccak256(PROTOCOL_VERSION.as_bytes()).as_slice());
        enc.extend_from_slice(&U256::from(chain_id).to_be_bytes::<32>());
        enc.extend_from_slice(&addr_word(verifying_contract));
        let domain_separator = keccak256(&enc);

        Self {
            offer_item_type_hash,
            consideration_item_type_hash,
            order_type_hash,
            domain_separator,
        }
    }

    pub fn domain_separator(&self) -> B256 {
        self.domain_separator
    }

    /// EIP-712 struct hash of the order — the order's unique id.
    ///
    /// The consideration array is truncated to
    /// `total_original_consideration_items`, matching the verifier, which
    /// derives the hash over only the originally signed items.
    pub fn order_hash(&self, order: &OrderComponents) -> B256 {
        let original = order
            .total_original_consideration_items
            .min(order.consideration.len());

        let offer_hashes: Vec<B256> = order
            .offer
            .iter()
            .map(|item| self.offer_item_hash(item))
            .collect();
        let consideration_hashes: Vec<B256> = order.consideration[..original]
            .iter()
            .map(|item| self.consideration_item_hash(item))
            .collect();

        let mut enc = Vec::with_capacity(12 * 32);
        enc.extend_from_slice(self.order_type_hash.as_slice());
        enc.extend_from_slice(&addr_word(order.offerer));
        enc.extend_from_slice(&addr_word(order.zone));
        enc.extend_from_slice(hash_concat(&offer_hashes).as_slice());
        enc.extend_from_slice(hash_concat(&consideration_hashes).as_slice());
        enc.extend_from_slice(&U256::from(order.order_type as u8).to_be_bytes::<32>());
        enc.extend_from_slice(&order.start_time.to_be_bytes::<32>());
        enc.extend_from_slice(&order.end_time.to_be_bytes::<32>());
        enc.extend_from_slice(order.zone_hash.as_slice());
        enc.extend_from_slice(&order.salt.to_be_bytes::<32>());
        enc.extend_from_slice(order.conduit_key.as_slice());
        enc.extend_from_slice(&order.counter.to_be_bytes::<32>());
        keccak256(&enc)
    }

    /// The 32-byte digest the offerer signs:
    /// keccak256(0x1901 ‖ domainSeparator ‖ orderHash).
    pub fn signing_digest(&self, order_hash: B256) -> B256 {
        let mut enc = Vec::with_capacity(2 + 64);
        enc.extend_from_slice(&[0x19, 0x01]);
        enc.extend_from_slice(self.domain_separator.as_slice());
        enc.extend_from_slice(order_hash.as_slice());
        keccak256(&enc)
    }

    fn offer_item_hash(&self, item: &OfferItem) -> B256 {
        let mut enc = Vec::with_capacity(6 * 32);
        enc.extend_from_slice(self.offer_item_type_hash.as_slice());
        enc.extend_from_slice(&U256::from(item.item_type as u8).to_be_bytes::<32>());
        enc.extend_from_slice(&addr_word(item.token));
        enc.extend_from_slice(&item.identifier_or_criteria.to_be_bytes::<32>());
        enc.extend_from_slice(&item.start_amount.to_be_bytes::<32>());
        enc.extend_from_slice(&item.end_amount.to_be_bytes::<32>());
        keccak256(&enc)
    }

    fn consideration_item_hash(&self, item: &ConsiderationItem) -> B256 {
        let mut enc = Vec::with_capacity(7 * 32);
        enc.extend_from_slice(self.consideration_item_type_hash.as_slice());
        enc.extend_from_slice(&U256::from(item.item_type as u8).to_be_bytes::<32>());
        enc.extend_from_slice(&addr_word(item.token));
        enc.extend_from_slice(&item.identifier_or_criteria.to_be_bytes::<32>());
        enc.extend_from_slice(&item.start_amount.to_be_bytes::<32>());
        enc.extend_from_slice(&item.end_amount.to_be_bytes::<32>());
        enc.extend_from_slice(&addr_word(item.recipient));
        keccak256(&enc)
    }
}

/// Hash a list of item hashes by concatenation. An empty list hashes the
/// empty byte string — never zero.
fn hash_concat(hashes: &[B256]) -> B256 {
    let mut enc = Vec::with_capacity(hashes.len() * 32);
    for hash in hashes {
        enc.extend_from_slice(hash.as_slice());
    }
    keccak256(&enc)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
