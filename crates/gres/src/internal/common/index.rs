use serde::{Deserialize, Serialize};
use std::ops::{Deref, DerefMut, Index, IndexMut};

/// Vec that can only be indexed by the specified `Idx` type.
/// Useful in combination with index types created by `define_id_type`.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IndexVec<Idx, Value>(
    Vec<Value>,
    #[serde(skip)] std::marker::PhantomData<Idx>,
);

impl<Idx, Value> Default for IndexVec<Idx, Value> {
    #[inline]
    fn default() -> Self {
        Self(Vec::new(), Default::default())
    }
}

impl<Idx: Into<usize>, Value: Clone> IndexVec<Idx, Value> {
    #[inline]
    pub fn filled(value: Value, count: usize) -> Self {
        Self(vec![value; count], Default::default())
    }
}

impl<Idx: Into<usize> + From<u32>, Value> IndexVec<Idx, Value> {
    #[inline]
    pub fn get_at(&self, index: Idx) -> Option<&Value> {
        self.0.get(index.into())
    }

    #[inline]
    pub fn get_at_mut(&mut self, index: Idx) -> Option<&mut Value> {
        self.0.get_mut(index.into())
    }

    pub fn iter_enumerated(&self) -> impl Iterator<Item = (Idx, &Value)> {
        self.0
            .iter()
            .enumerate()
            .map(|(i, v)| (Idx::from(i as u32), v))
    }

    pub fn iter_enumerated_mut(&mut self) -> impl Iterator<Item = (Idx, &mut Value)> {
        self.0
            .iter_mut()
            .enumerate()
            .map(|(i, v)| (Idx::from(i as u32), v))
    }
}

impl<Idx: Into<usize>, Value> Index<Idx> for IndexVec<Idx, Value> {
    type Output = Value;

    #[inline]
    fn index(&self, index: Idx) -> &Self::Output {
        self.0.index(index.into())
    }
}

impl<Idx: Into<usize>, Value> IndexMut<Idx> for IndexVec<Idx, Value> {
    #[inline]
    fn index_mut(&mut self, index: Idx) -> &mut Self::Output {
        self.0.index_mut(index.into())
    }
}

impl<Idx, Value> From<Vec<Value>> for IndexVec<Idx, Value> {
    #[inline]
    fn from(vec: Vec<Value>) -> Self {
        Self(vec, Default::default())
    }
}

impl<Idx, Value> FromIterator<Value> for IndexVec<Idx, Value> {
    #[inline]
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Self(iter.into_iter().collect(), Default::default())
    }
}

impl<Idx, Value> Deref for IndexVec<Idx, Value> {
    type Target = Vec<Value>;

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<Idx, Value> DerefMut for IndexVec<Idx, Value> {
    #[inline]
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

/// Create a newtype that will contain an index represented by an integer.
#[macro_export]
macro_rules! define_id_type {
    ($name: ident, $type: ident) => {
        #[derive(
            ::std::marker::Copy,
            ::std::clone::Clone,
            ::std::default::Default,
            ::std::fmt::Debug,
            ::std::hash::Hash,
            ::serde::Serialize,
            ::serde::Deserialize,
            ::std::cmp::Ord,
            ::std::cmp::PartialOrd,
            ::std::cmp::Eq,
            ::std::cmp::PartialEq,
        )]
        #[serde(transparent)]
        pub struct $name($type);

        impl $name {
            #[inline]
            pub const fn new(value: $type) -> Self {
                Self(value)
            }

            #[inline]
            pub fn as_num(&self) -> $type {
                self.0
            }

            #[inline]
            pub fn as_usize(&self) -> usize {
                self.0 as usize
            }
        }

        impl ::std::convert::From<$type> for $name {
            #[inline]
            fn from(value: $type) -> Self {
                Self::new(value)
            }
        }

        impl ::std::convert::From<$name> for $type {
            #[inline]
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl ::std::convert::From<$name> for usize {
            #[inline]
            fn from(id: $name) -> Self {
                id.0 as usize
            }
        }

        impl ::std::fmt::Display for $name {
            #[inline]
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::IndexVec;

    define_id_type!(TestId, u32);

    #[test]
    fn test_index_vec_enumerated() {
        let v: IndexVec<TestId, &str> = vec!["a", "b"].into();
        let items: Vec<_> = v.iter_enumerated().collect();
        assert_eq!(items, vec![(TestId::new(0), &"a"), (TestId::new(1), &"b")]);
        assert_eq!(v[TestId::new(1)], "b");
        assert!(v.get_at(TestId::new(2)).is_none());
    }
}
