use smallvec::SmallVec;

use crate::internal::common::bitmap::DeviceBitmap;
use crate::internal::common::ids::DeviceIndex;
use crate::internal::resources::amount::DeviceCount;

pub(crate) type Picked = SmallVec<[(DeviceIndex, DeviceCount); 4]>;

/// Orders devices for selection: affine devices first, each group by index.
/// With `affine_only` the devices outside of `affine` are left out.
pub(crate) fn device_order(
    devices: impl Iterator<Item = DeviceIndex> + Clone,
    affine: Option<&DeviceBitmap>,
    affine_only: bool,
) -> SmallVec<[DeviceIndex; 8]> {
    match affine {
        Some(affine) => {
            let mut order: SmallVec<[DeviceIndex; 8]> = devices
                .clone()
                .filter(|d| affine.contains(d.as_num()))
                .collect();
            if !affine_only {
                order.extend(devices.filter(|d| !affine.contains(d.as_num())));
            }
            order
        }
        None => devices.collect(),
    }
}

/// Picks `needed` units out of candidates `(device, free units)` taken in the given order.
///
/// Non-shared devices give one unit each. A shared type is served by a single device,
/// the first one with enough free shares.
pub(crate) fn pick_units(
    candidates: impl Iterator<Item = (DeviceIndex, DeviceCount)>,
    needed: DeviceCount,
    shared: bool,
) -> Option<Picked> {
    if needed == 0 {
        return Some(SmallVec::new());
    }
    if shared {
        return candidates
            .filter(|(_, free)| *free >= needed)
            .map(|(device, _)| {
                let mut picked = SmallVec::new();
                picked.push((device, needed));
                picked
            })
            .next();
    }
    let picked: Picked = candidates
        .filter(|(_, free)| *free > 0)
        .take(needed as usize)
        .map(|(device, _)| (device, 1))
        .collect();
    (picked.len() as DeviceCount == needed).then_some(picked)
}

/// Most units `pick_units` can give out of the candidates
pub(crate) fn eligible_units(
    candidates: impl Iterator<Item = (DeviceIndex, DeviceCount)>,
    shared: bool,
) -> DeviceCount {
    if shared {
        candidates.map(|(_, free)| free).max().unwrap_or(0)
    } else {
        candidates.filter(|(_, free)| *free > 0).count() as DeviceCount
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::internal::common::bitmap::Bitmap;

    fn indices(order: &[DeviceIndex]) -> Vec<u32> {
        order.iter().map(|d| d.as_num()).collect()
    }

    #[test]
    fn test_device_order_affine_first() {
        let all = (0..4).map(DeviceIndex::new);
        let affine = Bitmap::from_indices(4, [2, 3]);
        assert_eq!(indices(&device_order(all.clone(), None, false)), vec![0, 1, 2, 3]);
        assert_eq!(
            indices(&device_order(all.clone(), Some(&affine), false)),
            vec![2, 3, 0, 1]
        );
        assert_eq!(indices(&device_order(all, Some(&affine), true)), vec![2, 3]);
    }

    #[test]
    fn test_pick_units() {
        let free: [(DeviceIndex, DeviceCount); 3] = [(0.into(), 0), (1.into(), 1), (2.into(), 1)];
        let picked = pick_units(free.iter().copied(), 2, false).unwrap();
        assert_eq!(
            picked.as_slice(),
            &[(DeviceIndex::new(1), 1), (DeviceIndex::new(2), 1)]
        );
        assert!(pick_units(free.iter().copied(), 3, false).is_none());
        assert!(pick_units(free.iter().copied(), 0, false).unwrap().is_empty());
        assert_eq!(eligible_units(free.iter().copied(), false), 2);
    }

    #[test]
    fn test_pick_units_shared_single_device() {
        let free: [(DeviceIndex, DeviceCount); 3] =
            [(0.into(), 30), (1.into(), 80), (2.into(), 100)];
        let picked = pick_units(free.iter().copied(), 50, true).unwrap();
        assert_eq!(picked.as_slice(), &[(DeviceIndex::new(1), 50)]);
        // 30 + 80 would be enough, but shares are never split over devices
        assert!(pick_units(free[..2].iter().copied(), 90, true).is_none());
        assert_eq!(eligible_units(free.iter().copied(), true), 100);
    }
}
