use filterlab::Image;

/// Black square with one white pixel in the centre.
pub fn single_white_pixel(size: usize) -> Image {
    let c = size / 2;
    Image::from_fn(size, size, 1, |y, x, _| if x == c && y == c { 255 } else { 0 })
        .expect("valid geometry")
}

/// Left half at `dark`, right half at `bright`.
pub fn bimodal(width: usize, height: usize, dark: u8, bright: u8) -> Image {
    Image::from_fn(width, height, 1, |_, x, _| if x < width / 2 { dark } else { bright })
        .expect("valid geometry")
}

/// Smooth RGB ramp with a different slope per channel.
pub fn gradient_rgb(width: usize, height: usize) -> Image {
    Image::from_fn(width, height, 3, |y, x, c| {
        let v = match c {
            0 => x * 255 / width.max(2).saturating_sub(1).max(1),
            1 => y * 255 / height.max(2).saturating_sub(1).max(1),
            _ => (x + y) * 255 / (width + height).saturating_sub(2).max(1),
        };
        v.min(255) as u8
    })
    .expect("valid geometry")
}

/// High-contrast checkerboard, grayscale.
pub fn checkerboard(width: usize, height: usize, cell: usize) -> Image {
    assert!(cell > 0, "cell size must be positive");
    Image::from_fn(width, height, 1, |y, x, _| {
        if (x / cell + y / cell) % 2 == 0 {
            32
        } else {
            220
        }
    })
    .expect("valid geometry")
}

/// Smooth sinusoidal texture, grayscale or RGB.
pub fn texture(width: usize, height: usize, channels: usize) -> Image {
    Image::from_fn(width, height, channels, |y, x, c| {
        let v = 128.0
            + 50.0 * ((x as f64) * 0.45 + c as f64).sin()
            + 35.0 * ((y as f64) * 0.3 + 0.5 * c as f64).cos();
        v.round() as u8
    })
    .expect("valid geometry")
}

/// Deterministic pseudo-random samples.
pub fn noise(width: usize, height: usize, channels: usize) -> Image {
    Image::from_fn(width, height, channels, |y, x, c| {
        let h = (x as u32)
            .wrapping_mul(73856093)
            ^ (y as u32).wrapping_mul(19349663)
            ^ (c as u32).wrapping_mul(83492791);
        (h.wrapping_mul(2654435761) >> 24) as u8
    })
    .expect("valid geometry")
}
