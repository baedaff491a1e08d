use crate::AccountError;
use chainstate_crypto::{Hash, EMPTY_HASH};
use chainstate_storage::Storage;
use chainstate_trie::BatchTrie;
use std::sync::Arc;

const BALANCE_LEN: usize = 16;
const NONCE_LEN: usize = 8;
const HASH_LEN: usize = 32;
const ENCODED_LEN: usize = BALANCE_LEN + NONCE_LEN + HASH_LEN + HASH_LEN;

/// A single on-chain entity: balance, nonce, and an inner variables trie
/// for per-account storage. User accounts leave `variables` empty; contract
/// accounts use it to hold persistent key-value state.
///
/// Cloning deep-copies the inner trie's node tree and any pending batch
/// overlay (`BatchTrie` itself derives `Clone`), while sharing the
/// underlying storage handle.
#[derive(Clone)]
pub struct Account {
    balance: u128,
    nonce: u64,
    variables: BatchTrie,
    birth_place: Hash,
}

impl Account {
    /// A fresh user account: zero balance, zero nonce, empty storage,
    /// empty birth place.
    pub fn new_user(storage: Arc<dyn Storage>) -> Self {
        Self {
            balance: 0,
            nonce: 0,
            variables: BatchTrie::empty(storage),
            birth_place: EMPTY_HASH,
        }
    }

    /// A fresh contract account created by the transaction hashing to
    /// `birth_place`.
    pub fn new_contract(storage: Arc<dyn Storage>, birth_place: Hash) -> Self {
        Self {
            balance: 0,
            nonce: 0,
            variables: BatchTrie::empty(storage),
            birth_place,
        }
    }

    pub fn balance(&self) -> u128 {
        self.balance
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn vars_hash(&self) -> Hash {
        self.variables.root_hash()
    }

    pub fn birth_place(&self) -> Hash {
        self.birth_place
    }

    /// The storage backend this account's inner trie persists to.
    pub fn storage_handle(&self) -> Arc<dyn Storage> {
        self.variables.storage()
    }

    /// # Panics
    /// Panics on nonce overflow. Indicates a caller bug, not a recoverable
    /// condition.
    pub fn increment_nonce(&mut self) {
        self.nonce = self.nonce.checked_add(1).expect("nonce overflow");
    }

    /// # Panics
    /// Panics on balance overflow of the 128-bit domain. Indicates a
    /// caller bug, not a recoverable condition.
    pub fn add_balance(&mut self, value: u128) {
        self.balance = self.balance.checked_add(value).expect("balance overflow");
    }

    pub fn sub_balance(&mut self, value: u128) -> Result<(), AccountError> {
        self.balance = self
            .balance
            .checked_sub(value)
            .ok_or(AccountError::BalanceInsufficient)?;
        Ok(())
    }

    pub fn put(&mut self, key: &[u8], value: &[u8]) {
        self.variables.put(key, value);
    }

    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>, AccountError> {
        self.variables.get(key).ok_or(AccountError::NotFound)
    }

    pub fn del(&mut self, key: &[u8]) {
        self.variables.delete(key);
    }

    /// Pairs whose key extends `prefix`, in the inner trie's own key order.
    pub fn iterator(&self, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.variables.iterator(prefix)
    }

    /// Canonical on-disk encoding: `balance` (16-byte BE), `nonce` (8-byte
    /// BE), `vars_hash` (32 bytes), `birth_place` (32 bytes). Fixed-width
    /// and hand-rolled rather than a general-purpose serializer, because
    /// this byte layout is part of the consensus contract.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(ENCODED_LEN);
        buf.extend_from_slice(&self.balance.to_be_bytes());
        buf.extend_from_slice(&self.nonce.to_be_bytes());
        buf.extend_from_slice(&self.vars_hash());
        buf.extend_from_slice(&self.birth_place);
        buf
    }

    /// Reconstructs an Account from its canonical encoding, opening its
    /// inner trie at the decoded `vars_hash` against `storage`.
    pub fn from_bytes(raw: &[u8], storage: Arc<dyn Storage>) -> Result<Self, AccountError> {
        if raw.len() != ENCODED_LEN {
            return Err(AccountError::Malformed(format!(
                "expected {ENCODED_LEN} bytes, got {}",
                raw.len()
            )));
        }
        let balance = u128::from_be_bytes(raw[0..16].try_into().unwrap());
        let nonce = u64::from_be_bytes(raw[16..24].try_into().unwrap());
        let vars_hash: Hash = raw[24..56].try_into().unwrap();
        let birth_place: Hash = raw[56..88].try_into().unwrap();

        let variables = BatchTrie::new(vars_hash, storage)?;

        Ok(Self { balance, nonce, variables, birth_place })
    }

    pub fn begin_batch(&mut self) {
        self.variables.begin_batch();
    }

    /// Commit failures are logged, not returned. An inner-trie batch error
    /// here would otherwise force every caller of `AccountState::commit` to
    /// handle a condition this layer cannot usefully recover from.
    pub fn commit(&mut self) {
        if let Err(err) = self.variables.commit() {
            tracing::warn!(error = %err, "inner trie commit failed");
        }
    }

    pub fn rollback(&mut self) {
        self.variables.rollback();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainstate_storage::InMemoryStorage;

    fn storage() -> Arc<dyn Storage> {
        Arc::new(InMemoryStorage::new())
    }

    #[test]
    fn new_user_account_starts_at_zero() {
        let account = Account::new_user(storage());
        assert_eq!(account.balance(), 0);
        assert_eq!(account.nonce(), 0);
        assert_eq!(account.vars_hash(), EMPTY_HASH);
        assert_eq!(account.birth_place(), EMPTY_HASH);
    }

    #[test]
    fn add_and_sub_balance() {
        let mut account = Account::new_user(storage());
        account.add_balance(100);
        assert_eq!(account.balance(), 100);
        account.sub_balance(40).unwrap();
        assert_eq!(account.balance(), 60);
    }

    #[test]
    fn sub_balance_below_zero_fails_and_leaves_balance_unchanged() {
        let mut account = Account::new_user(storage());
        account.add_balance(100);
        let err = account.sub_balance(200).unwrap_err();
        assert!(matches!(err, AccountError::BalanceInsufficient));
        assert_eq!(account.balance(), 100);
    }

    #[test]
    #[should_panic(expected = "balance overflow")]
    fn add_balance_overflow_panics() {
        let mut account = Account::new_user(storage());
        account.add_balance(u128::MAX);
        account.add_balance(1);
    }

    #[test]
    #[should_panic(expected = "nonce overflow")]
    fn increment_nonce_overflow_panics() {
        let mut account = Account::new_user(storage());
        account.nonce = u64::MAX;
        account.increment_nonce();
    }

    #[test]
    fn increment_nonce_is_monotonic() {
        let mut account = Account::new_user(storage());
        account.increment_nonce();
        let first = account.nonce();
        account.increment_nonce();
        assert!(account.nonce() > first);
    }

    #[test]
    fn put_get_del_round_trip_through_inner_trie() {
        let mut account = Account::new_user(storage());
        account.put(b"counter", &[1]);
        assert_eq!(account.get(b"counter").unwrap(), vec![1]);
        account.del(b"counter");
        assert!(matches!(account.get(b"counter"), Err(AccountError::NotFound)));
    }

    #[test]
    fn serialization_round_trips() {
        let shared_storage = storage();
        let mut account = Account::new_contract(shared_storage.clone(), [0xAA; 32]);
        account.add_balance(100);
        account.increment_nonce();
        account.increment_nonce();

        let bytes = account.to_bytes();
        assert_eq!(bytes.len(), ENCODED_LEN);

        let restored = Account::from_bytes(&bytes, shared_storage).unwrap();
        assert_eq!(restored.balance(), 100);
        assert_eq!(restored.nonce(), 2);
        assert_eq!(restored.vars_hash(), account.vars_hash());
        assert_eq!(restored.birth_place(), [0xAA; 32]);
    }

    #[test]
    fn from_bytes_rejects_wrong_length() {
        let err = Account::from_bytes(&[0u8; 10], storage()).unwrap_err();
        assert!(matches!(err, AccountError::Malformed(_)));
    }
}
