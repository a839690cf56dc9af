//! End-to-end scenarios against the in-process mock ledger

mod test_helpers;
