//! Property-based tests for the indexed heap.

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use crate::heap::IndexedHeap;

    /// Random sequence of heap operations keyed by a small key space so
    /// that replace/update/delete paths are actually exercised.
    #[derive(Debug, Clone)]
    enum Op {
        Push(u8, i32),
        Update(u8, i32),
        Delete(u8),
        Pop,
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u8..16, any::<i32>()).prop_map(|(k, v)| Op::Push(k, v)),
            (0u8..16, any::<i32>()).prop_map(|(k, v)| Op::Update(k, v)),
            (0u8..16).prop_map(Op::Delete),
            Just(Op::Pop),
        ]
    }

    proptest! {
        /// After any operation sequence, draining the heap yields values
        /// in non-increasing order and exactly the surviving key set.
        #[test]
        fn test_heap_drains_sorted_and_complete(ops in proptest::collection::vec(op_strategy(), 1..200)) {
            let mut heap: IndexedHeap<u8, i32> = IndexedHeap::new(i32::cmp);
            let mut model: std::collections::HashMap<u8, i32> = std::collections::HashMap::new();

            for op in ops {
                match op {
                    Op::Push(k, v) => {
                        heap.push(k, v);
                        model.insert(k, v);
                    }
                    Op::Update(k, v) => {
                        if let Some(slot) = heap.get_mut(&k) {
                            *slot = v;
                            heap.update(&k);
                            model.insert(k, v);
                        }
                    }
                    Op::Delete(k) => {
                        let removed = heap.delete(&k);
                        prop_assert_eq!(removed, model.remove(&k));
                    }
                    Op::Pop => {
                        match heap.pop() {
                            Some((k, v)) => {
                                let max = model.values().copied().max();
                                prop_assert_eq!(Some(v), max);
                                prop_assert_eq!(model.remove(&k), Some(v));
                            }
                            None => prop_assert!(model.is_empty()),
                        }
                    }
                }
                prop_assert_eq!(heap.len(), model.len());
            }

            let mut drained = Vec::new();
            while let Some((k, v)) = heap.pop() {
                prop_assert_eq!(model.remove(&k), Some(v));
                drained.push(v);
            }
            prop_assert!(model.is_empty());
            prop_assert!(drained.windows(2).all(|w| w[0] >= w[1]));
        }
    }
}
