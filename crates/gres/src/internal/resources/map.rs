use crate::internal::common::Map;
use crate::internal::common::ids::DeviceTypeId;
use crate::internal::common::index::IndexVec;

pub type DeviceTypeVec<T> = IndexVec<DeviceTypeId, T>;

/// Registry of device type identifiers ("gpu", "gpu:a100", "nic", ...).
///
/// Ids are allocated in the order in which names are first seen and are never reused,
/// so they are stable for the whole lifetime of the controller.
#[derive(Debug, Default, Clone)]
pub struct DeviceTypeMap {
    names: DeviceTypeVec<String>,
    ids: Map<String, DeviceTypeId>,
}

impl DeviceTypeMap {
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Self {
        let mut map = DeviceTypeMap::default();
        for name in names {
            map.get_or_allocate_id(name.as_ref());
        }
        map
    }

    pub fn get_or_allocate_id(&mut self, name: &str) -> DeviceTypeId {
        match self.ids.get(name) {
            Some(&id) => id,
            None => {
                let id = DeviceTypeId::new(self.names.len() as u32);
                log::debug!("New device type registered '{name}' as {id}");
                self.ids.insert(name.to_string(), id);
                self.names.push(name.to_string());
                id
            }
        }
    }

    #[inline]
    pub fn get_id(&self, name: &str) -> Option<DeviceTypeId> {
        self.ids.get(name).copied()
    }

    #[inline]
    pub fn get_name(&self, id: DeviceTypeId) -> Option<&str> {
        self.names.get_at(id).map(|s| s.as_str())
    }

    /// Name for reporting purposes; never fails
    pub fn display_name(&self, id: DeviceTypeId) -> &str {
        self.get_name(id).unwrap_or("unknown")
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (DeviceTypeId, &str)> {
        self.names
            .iter_enumerated()
            .map(|(id, name)| (id, name.as_str()))
    }
}

/// Splits "gpu:a100" into ("gpu", Some("a100"))
pub fn split_type_name(name: &str) -> (&str, Option<&str>) {
    match name.split_once(':') {
        Some((base, subtype)) => (base, Some(subtype)),
        None => (name, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_map_ids_are_stable() {
        let mut map = DeviceTypeMap::from_names(&["gpu", "nic"]);
        assert_eq!(map.get_or_allocate_id("nic"), DeviceTypeId::new(1));
        assert_eq!(map.get_or_allocate_id("gpu:a100"), DeviceTypeId::new(2));
        assert_eq!(map.get_name(DeviceTypeId::new(2)), Some("gpu:a100"));
        assert_eq!(map.display_name(DeviceTypeId::new(7)), "unknown");
        assert_eq!(map.len(), 3);
    }

    #[test]
    fn test_split_type_name() {
        assert_eq!(split_type_name("gpu"), ("gpu", None));
        assert_eq!(split_type_name("gpu:a100"), ("gpu", Some("a100")));
    }
}
