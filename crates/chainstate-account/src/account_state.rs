use crate::{Account, AccountError, Address};
use chainstate_crypto::{keccak256, Hash};
use chainstate_storage::Storage;
use chainstate_trie::BatchTrie;
use std::collections::HashMap;
use std::sync::Arc;

/// Collection of accounts addressable by opaque address, backed by an outer
/// state trie mapping `keccak256(address) -> serialized_account`.
///
/// Every account touched since the last commit/rollback lives in `dirty`,
/// deferring its serialization into the outer trie until `root_hash()` or
/// `commit()`.
pub struct AccountState {
    state_trie: BatchTrie,
    dirty: HashMap<Address, Account>,
    batching: bool,
    storage: Arc<dyn Storage>,
}

impl AccountState {
    /// Opens the outer trie at `root_hash` (or creates an empty state if
    /// `root_hash` is the empty-trie sentinel).
    pub fn new(root_hash: Hash, storage: Arc<dyn Storage>) -> Result<Self, AccountError> {
        let state_trie = BatchTrie::new(root_hash, storage.clone())?;
        Ok(Self { state_trie, dirty: HashMap::new(), batching: false, storage })
    }

    /// Loads `addr` into the dirty set if it isn't already there. Returns
    /// whether an account exists for `addr` (in the dirty set or the outer
    /// trie) after the call.
    ///
    /// A malformed stored account indicates corrupted storage, not a
    /// recoverable condition, so this panics rather than returning an
    /// error the caller has no sane way to act on.
    fn load_into_dirty(&mut self, addr: Address) -> bool {
        if self.dirty.contains_key(&addr) {
            return true;
        }
        let key = keccak256(addr.as_ref());
        let Some(raw) = self.state_trie.get(&key) else {
            return false;
        };
        let mut account = Account::from_bytes(&raw, self.storage.clone())
            .expect("corrupted account encoding in state trie");
        if self.batching {
            account.begin_batch();
        }
        self.dirty.insert(addr, account);
        true
    }

    /// Returns the account at `addr`, creating a fresh user account if none
    /// exists. The new account is recorded as dirty.
    pub fn get_or_create_user_account(&mut self, addr: Address) -> &mut Account {
        if !self.load_into_dirty(addr) {
            let mut account = Account::new_user(self.storage.clone());
            if self.batching {
                account.begin_batch();
            }
            self.dirty.insert(addr, account);
        }
        self.dirty.get_mut(&addr).expect("just inserted or already dirty")
    }

    /// Existing-only lookup; never creates an account.
    pub fn get_contract_account(&mut self, addr: Address) -> Result<&mut Account, AccountError> {
        if self.load_into_dirty(addr) {
            Ok(self.dirty.get_mut(&addr).expect("load_into_dirty returned true"))
        } else {
            Err(AccountError::AccountNotFound)
        }
    }

    /// Creates a contract account with the given birth place, replacing
    /// whatever was previously dirty at `addr`. Overwriting an existing
    /// on-chain account is a caller-checked precondition, not enforced
    /// here.
    pub fn create_contract_account(&mut self, addr: Address, birth_place: Hash) -> &mut Account {
        let mut account = Account::new_contract(self.storage.clone(), birth_place);
        if self.batching {
            account.begin_batch();
        }
        self.dirty.insert(addr, account);
        self.dirty.get_mut(&addr).expect("just inserted")
    }

    /// Flushes every dirty account's canonical encoding into the outer
    /// trie under `keccak256(addr)` and returns the outer trie's root.
    /// Does not clear the dirty set or end a batch. Repeated calls with
    /// no intervening mutation return the same hash.
    pub fn root_hash(&mut self) -> Hash {
        for (addr, account) in self.dirty.iter() {
            let key = keccak256(addr.as_ref());
            self.state_trie.put(&key, &account.to_bytes());
        }
        self.state_trie.root_hash()
    }

    /// Opens a batch. Nested `begin_batch` is not supported: callers must
    /// drive exactly one outstanding batch per `AccountState` at a time.
    pub fn begin_batch(&mut self) -> Result<(), AccountError> {
        if self.batching {
            return Err(AccountError::AlreadyBatching);
        }
        self.batching = true;
        self.state_trie.begin_batch();
        tracing::debug!("account state batch opened");
        Ok(())
    }

    /// Commits every dirty account's inner trie, flushes its serialization
    /// into the outer trie, commits the outer trie, and empties the dirty
    /// set. A no-op if no batch is open.
    pub fn commit(&mut self) -> Result<(), AccountError> {
        if !self.batching {
            return Ok(());
        }
        for (addr, account) in self.dirty.iter_mut() {
            account.commit();
            let key = keccak256(addr.as_ref());
            self.state_trie.put(&key, &account.to_bytes());
        }
        let touched = self.dirty.len();
        self.dirty.clear();
        self.state_trie.commit()?;
        self.batching = false;
        tracing::info!(accounts = touched, root = %hex::encode(self.state_trie.root_hash()), "account state committed");
        Ok(())
    }

    /// Rolls back the outer trie and every dirty account's inner trie, and
    /// clears the dirty set. A no-op if no batch is open.
    pub fn rollback(&mut self) {
        if !self.batching {
            return;
        }
        for account in self.dirty.values_mut() {
            account.rollback();
        }
        let discarded = self.dirty.len();
        self.dirty.clear();
        self.state_trie.rollback();
        self.batching = false;
        tracing::debug!(accounts = discarded, "account state batch rolled back");
    }

    /// An independent snapshot: the dirty set is deep-copied, the outer
    /// trie is cloned, and the storage handle is shared.
    ///
    /// Named `try_clone` rather than implementing `std::clone::Clone`
    /// directly, since the outer trie clone can in principle need to
    /// surface an error in a future backend.
    pub fn try_clone(&self) -> Result<Self, AccountError> {
        Ok(Self {
            state_trie: self.state_trie.clone(),
            dirty: self.dirty.clone(),
            batching: self.batching,
            storage: self.storage.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainstate_crypto::EMPTY_HASH;
    use chainstate_storage::InMemoryStorage;

    fn storage() -> Arc<dyn Storage> {
        Arc::new(InMemoryStorage::new())
    }

    fn addr(byte: u8) -> Address {
        Address::new([byte; 20])
    }

    #[test]
    fn s1_empty_root_is_empty_hash() {
        let mut state = AccountState::new(EMPTY_HASH, storage()).unwrap();
        assert_eq!(state.root_hash(), EMPTY_HASH);
    }

    #[test]
    fn s2_single_user_account() {
        let mut state = AccountState::new(EMPTY_HASH, storage()).unwrap();
        let a = addr(0x01);

        {
            let account = state.get_or_create_user_account(a);
            account.add_balance(100);
            account.increment_nonce();
            account.increment_nonce();
        }

        let account = state.get_or_create_user_account(a);
        assert_eq!(account.balance(), 100);
        assert_eq!(account.nonce(), 2);
        assert_eq!(account.vars_hash(), EMPTY_HASH);
        assert_eq!(account.birth_place(), EMPTY_HASH);

        let root = state.root_hash();
        assert_ne!(root, EMPTY_HASH);
    }

    #[test]
    fn s3_insufficient_balance_leaves_root_unchanged() {
        let mut state = AccountState::new(EMPTY_HASH, storage()).unwrap();
        let a = addr(0x02);
        state.get_or_create_user_account(a).add_balance(100);
        let root_before = state.root_hash();

        let err = state.get_or_create_user_account(a).sub_balance(200).unwrap_err();
        assert!(matches!(err, AccountError::BalanceInsufficient));
        assert_eq!(state.get_or_create_user_account(a).balance(), 100);
        assert_eq!(state.root_hash(), root_before);
    }

    #[test]
    fn s4_contract_creation_and_storage() {
        let shared_storage = storage();
        let mut state = AccountState::new(EMPTY_HASH, shared_storage.clone()).unwrap();
        let b = addr(0x21);

        {
            let account = state.create_contract_account(b, [0xAA; 32]);
            account.put(b"counter", &[0x01]);
            account.put(b"counter", &[0x02]);
            assert_eq!(account.get(b"counter").unwrap(), vec![0x02]);
            account.del(b"counter");
            assert!(matches!(account.get(b"counter"), Err(AccountError::NotFound)));
        }

        state.begin_batch().unwrap();
        state.commit().unwrap();
        let root = state.root_hash();

        let mut reopened = AccountState::new(root, shared_storage).unwrap();
        let reloaded = reopened.get_contract_account(b).unwrap();
        assert_eq!(reloaded.vars_hash(), EMPTY_HASH);
        assert_eq!(reloaded.birth_place(), [0xAA; 32]);
    }

    #[test]
    fn idle_inner_trie_mutation_survives_outer_commit_and_reopen() {
        let shared_storage = storage();
        let mut state = AccountState::new(EMPTY_HASH, shared_storage.clone()).unwrap();
        let c = addr(0x22);

        {
            let account = state.create_contract_account(c, [0xBB; 32]);
            account.put(b"counter", &[0x07]);
        }

        state.begin_batch().unwrap();
        state.commit().unwrap();
        let root = state.root_hash();

        let mut reopened = AccountState::new(root, shared_storage).unwrap();
        let reloaded = reopened.get_contract_account(c).unwrap();
        assert_eq!(reloaded.get(b"counter").unwrap(), vec![0x07]);
    }

    #[test]
    fn s5_batch_rollback_restores_root_and_discards_new_account() {
        let mut state = AccountState::new(EMPTY_HASH, storage()).unwrap();
        let existing = addr(0x03);
        state.get_or_create_user_account(existing).add_balance(50);
        state.begin_batch().unwrap();
        state.commit().unwrap();
        let r0 = state.root_hash();

        state.begin_batch().unwrap();
        state.get_or_create_user_account(existing).add_balance(1000);
        let new_addr = addr(0x04);
        state.get_or_create_user_account(new_addr);
        state.rollback();

        assert_eq!(state.root_hash(), r0);
        assert!(matches!(
            state.get_contract_account(new_addr),
            Err(AccountError::AccountNotFound)
        ));
    }

    #[test]
    fn s6_two_level_commit_is_order_independent() {
        let a = addr(0x10);
        let b = addr(0x11);

        let mut interleaved = AccountState::new(EMPTY_HASH, storage()).unwrap();
        interleaved.begin_batch().unwrap();
        for i in 0..10u8 {
            let key = [i];
            interleaved.get_or_create_user_account(a).put(&key, &[i]);
            interleaved.get_or_create_user_account(b).put(&key, &[i]);
        }
        interleaved.commit().unwrap();
        let root_interleaved = interleaved.root_hash();

        let mut partitioned = AccountState::new(EMPTY_HASH, storage()).unwrap();
        partitioned.begin_batch().unwrap();
        for i in 0..10u8 {
            partitioned.get_or_create_user_account(a).put(&[i], &[i]);
        }
        for i in 0..10u8 {
            partitioned.get_or_create_user_account(b).put(&[i], &[i]);
        }
        partitioned.commit().unwrap();
        let root_partitioned = partitioned.root_hash();

        assert_eq!(root_interleaved, root_partitioned);
    }

    #[test]
    fn nested_begin_batch_is_rejected() {
        let mut state = AccountState::new(EMPTY_HASH, storage()).unwrap();
        state.begin_batch().unwrap();
        assert!(matches!(state.begin_batch(), Err(AccountError::AlreadyBatching)));
    }

    #[test]
    fn root_hash_is_idempotent_with_no_intervening_mutation() {
        let mut state = AccountState::new(EMPTY_HASH, storage()).unwrap();
        state.get_or_create_user_account(addr(0x05)).add_balance(7);
        let first = state.root_hash();
        let second = state.root_hash();
        assert_eq!(first, second);
    }

    #[test]
    fn clone_deep_copies_dirty_set() {
        let mut state = AccountState::new(EMPTY_HASH, storage()).unwrap();
        state.get_or_create_user_account(addr(0x06)).add_balance(10);

        let mut cloned = state.try_clone().unwrap();
        cloned.get_or_create_user_account(addr(0x06)).add_balance(5);

        assert_eq!(state.get_or_create_user_account(addr(0x06)).balance(), 10);
        assert_eq!(cloned.get_or_create_user_account(addr(0x06)).balance(), 15);
    }
}

// -----------------------------------------------------------------------
// Property-based tests (proptest)
// -----------------------------------------------------------------------

#[cfg(test)]
mod prop_tests {
    use super::*;
    use chainstate_storage::InMemoryStorage;
    use proptest::prelude::*;

    fn storage() -> Arc<dyn Storage> {
        Arc::new(InMemoryStorage::new())
    }

    fn addr_strategy() -> impl Strategy<Value = Address> {
        (0u8..4).prop_map(|b| Address::new([b; 20]))
    }

    fn amount_strategy() -> impl Strategy<Value = u128> {
        0u128..1_000_000
    }

    fn apply_credit(state: &mut AccountState, addr: Address, amount: u128) {
        state.get_or_create_user_account(addr).add_balance(amount);
    }

    proptest! {
        /// Invariant 2: determinism of root. Two independent states replaying
        /// the same sequence of credits land on the same root.
        #[test]
        fn determinism_of_root(
            ops in proptest::collection::vec((addr_strategy(), amount_strategy()), 0..20)
        ) {
            let mut a = AccountState::new(EMPTY_HASH, storage()).unwrap();
            let mut b = AccountState::new(EMPTY_HASH, storage()).unwrap();
            for &(addr, amount) in &ops {
                apply_credit(&mut a, addr, amount);
                apply_credit(&mut b, addr, amount);
            }
            prop_assert_eq!(a.root_hash(), b.root_hash());
        }

        /// Invariant 3: order-independence of flush. Crediting the same set
        /// of addresses in a different order yields the same root, since
        /// each account is written under its own key.
        #[test]
        fn order_independence_of_flush(
            ops in proptest::collection::vec((addr_strategy(), amount_strategy()), 1..20)
        ) {
            let mut forward = AccountState::new(EMPTY_HASH, storage()).unwrap();
            for &(addr, amount) in &ops {
                apply_credit(&mut forward, addr, amount);
            }
            let root_forward = forward.root_hash();

            let mut reversed = AccountState::new(EMPTY_HASH, storage()).unwrap();
            for &(addr, amount) in ops.iter().rev() {
                apply_credit(&mut reversed, addr, amount);
            }
            let root_reversed = reversed.root_hash();

            prop_assert_eq!(root_forward, root_reversed);
        }

        /// Invariant 4: rollback isolation. Any sequence of mutations inside
        /// a batch, followed by rollback, restores the pre-batch root.
        #[test]
        fn rollback_isolation(
            prelude in proptest::collection::vec((addr_strategy(), amount_strategy()), 0..10),
            inside_batch in proptest::collection::vec((addr_strategy(), amount_strategy()), 0..10),
        ) {
            let mut state = AccountState::new(EMPTY_HASH, storage()).unwrap();
            for &(addr, amount) in &prelude {
                apply_credit(&mut state, addr, amount);
            }
            state.begin_batch().unwrap();
            state.commit().unwrap();
            let root_before = state.root_hash();

            state.begin_batch().unwrap();
            for &(addr, amount) in &inside_batch {
                apply_credit(&mut state, addr, amount);
            }
            state.rollback();

            prop_assert_eq!(state.root_hash(), root_before);
        }

        /// Invariant 5: commit idempotence of root.
        #[test]
        fn root_hash_idempotent(
            ops in proptest::collection::vec((addr_strategy(), amount_strategy()), 0..10)
        ) {
            let mut state = AccountState::new(EMPTY_HASH, storage()).unwrap();
            for &(addr, amount) in &ops {
                apply_credit(&mut state, addr, amount);
            }
            let first = state.root_hash();
            let second = state.root_hash();
            prop_assert_eq!(first, second);
        }

        /// Invariant 6: balance conservation across transfers.
        #[test]
        fn balance_conservation(
            transfers in proptest::collection::vec(
                (addr_strategy(), addr_strategy(), 0u128..100),
                0..15,
            )
        ) {
            let mut state = AccountState::new(EMPTY_HASH, storage()).unwrap();
            let funded = 100_000u128;
            for b in 0u8..4 {
                apply_credit(&mut state, Address::new([b; 20]), funded);
            }
            let total_before: u128 = (0u8..4)
                .map(|b| state.get_or_create_user_account(Address::new([b; 20])).balance())
                .sum();

            for (from, to, amount) in transfers {
                let from_balance = state.get_or_create_user_account(from).balance();
                if from_balance < amount {
                    continue;
                }
                state.get_or_create_user_account(from).sub_balance(amount).unwrap();
                state.get_or_create_user_account(to).add_balance(amount);
            }

            let total_after: u128 = (0u8..4)
                .map(|b| state.get_or_create_user_account(Address::new([b; 20])).balance())
                .sum();
            prop_assert_eq!(total_before, total_after);
        }

        /// Invariant 7: nonce monotonicity until rollback.
        #[test]
        fn nonce_monotonic_until_rollback(increments in 1u32..20) {
            let mut state = AccountState::new(EMPTY_HASH, storage()).unwrap();
            let addr = Address::new([1u8; 20]);

            let mut last = 0u64;
            for _ in 0..increments {
                state.get_or_create_user_account(addr).increment_nonce();
                let current = state.get_or_create_user_account(addr).nonce();
                prop_assert!(current > last);
                last = current;
            }

            state.begin_batch().unwrap();
            state.get_or_create_user_account(addr).increment_nonce();
            state.rollback();
            prop_assert_eq!(state.get_or_create_user_account(addr).nonce(), 0);
        }
    }
}
