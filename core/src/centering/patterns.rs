/// Screen-space search steps, in millimeters.
pub type ScanPattern = Vec<(f64, f64)>;

/// Eight-move loop around the start point, used to re-acquire a target
/// lost during the coarse phase.
pub fn small_scan(step: f64) -> ScanPattern {
    vec![
        (step, 0.0),
        (0.0, step),
        (-step, 0.0),
        (-step, 0.0),
        (0.0, -step),
        (0.0, -step),
        (step, 0.0),
        (step, 0.0),
    ]
}

/// Sixteen-move expanding spiral, used when the target is not in view at
/// all.
pub fn wide_scan(step: f64) -> ScanPattern {
    let mut pattern = small_scan(step);
    pattern.extend([
        (step, 0.0),
        (0.0, step),
        (0.0, step),
        (-step, 0.0),
        (-step, 0.0),
        (-step, 0.0),
        (0.0, -step),
        (0.0, -step),
    ]);
    pattern
}

#[cfg(test)]
mod tests {
    use super::*;

    fn net(pattern: &ScanPattern) -> (f64, f64) {
        pattern
            .iter()
            .fold((0.0, 0.0), |(x, y), (dx, dy)| (x + dx, y + dy))
    }

    #[test]
    fn small_scan_circles_the_start_point() {
        let pattern = small_scan(0.5);
        assert_eq!(pattern.len(), 8);
        assert_eq!(net(&pattern), (0.5, -0.5));
    }

    #[test]
    fn wide_scan_extends_the_small_loop() {
        let pattern = wide_scan(1.0);
        assert_eq!(pattern.len(), 16);
        assert_eq!(&pattern[..8], small_scan(1.0).as_slice());
        assert_eq!(net(&pattern), (-1.0, -1.0));
    }
}
