//! A tiny software rasterizer for pixel observations of the arm scene.

pub const IMAGE_SIZE: usize = 64;

const BACKGROUND: f64 = 0.0;
const LINK: f64 = 128.0;
const EFFECTOR: f64 = 200.0;
const BUTTON: f64 = 255.0;

/// Map world coordinates (`[-1, 1]` on both axes) to a pixel, if it lies on the image.
fn to_pixel(point: (f64, f64)) -> Option<(usize, usize)> {
    let scale = (IMAGE_SIZE - 1) as f64 / 2.0;
    let col = ((point.0 + 1.0) * scale).round();
    let row = ((1.0 - point.1) * scale).round();
    let range = 0.0..IMAGE_SIZE as f64;
    (range.contains(&col) && range.contains(&row)).then_some((row as usize, col as usize))
}

fn paint(
    image: &mut [f64],
    point: (f64, f64),
    value: f64,
) {
    if let Some((row, col)) = to_pixel(point) {
        let pixel = &mut image[row * IMAGE_SIZE + col];
        *pixel = pixel.max(value);
    }
}

fn line(
    image: &mut [f64],
    from: (f64, f64),
    to: (f64, f64),
    value: f64,
) {
    let steps = 2 * IMAGE_SIZE;
    for i in 0..=steps {
        let t = i as f64 / steps as f64;
        paint(
            image,
            (from.0 + t * (to.0 - from.0), from.1 + t * (to.1 - from.1)),
            value,
        );
    }
}

fn disc(
    image: &mut [f64],
    center: (f64, f64),
    radius: f64,
    value: f64,
) {
    let pixel = 2.0 / (IMAGE_SIZE - 1) as f64;
    let reach = (radius / pixel).ceil() as i64;
    for dr in -reach..=reach {
        for dc in -reach..=reach {
            let offset = (dc as f64 * pixel, dr as f64 * pixel);
            if offset.0.hypot(offset.1) <= radius {
                paint(image, (center.0 + offset.0, center.1 + offset.1), value);
            }
        }
    }
}

/// Render the scene into a row-major `IMAGE_SIZE x IMAGE_SIZE` grayscale image.
pub fn render(
    elbow: (f64, f64),
    effector: (f64, f64),
    button: (f64, f64),
    button_radius: f64,
) -> Vec<f64> {
    let mut image = vec![BACKGROUND; IMAGE_SIZE * IMAGE_SIZE];
    disc(&mut image, button, button_radius, BUTTON);
    line(&mut image, (0.0, 0.0), elbow, LINK);
    line(&mut image, elbow, effector, LINK);
    disc(&mut image, effector, 0.02, EFFECTOR);
    image
}

/// A coarse text version of an image, one character per 2x4 block of pixels.
pub fn ascii(image: &[f64]) -> String {
    let shades = [' ', '.', ':', '+', '#'];
    let mut out = String::new();
    for row in (0..IMAGE_SIZE).step_by(4) {
        for col in (0..IMAGE_SIZE).step_by(2) {
            let mut brightest: f64 = 0.0;
            for r in row..(row + 4).min(IMAGE_SIZE) {
                for c in col..(col + 2).min(IMAGE_SIZE) {
                    brightest = brightest.max(image[r * IMAGE_SIZE + c]);
                }
            }
            let shade = ((brightest / BUTTON) * (shades.len() - 1) as f64).round() as usize;
            out.push(shades[shade.min(shades.len() - 1)]);
        }
        out.push('\n');
    }
    out
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn button_and_arm_show_up() {
        let image = render((0.0, 0.5), (0.4, 0.5), (-0.5, -0.5), 0.05);
        assert_eq!(image.len(), IMAGE_SIZE * IMAGE_SIZE);

        let (row, col) = to_pixel((-0.5, -0.5)).unwrap();
        assert_eq!(image[row * IMAGE_SIZE + col], BUTTON);

        let (row, col) = to_pixel((0.0, 0.25)).unwrap();
        assert_eq!(image[row * IMAGE_SIZE + col], LINK);

        assert!(image.iter().all(|&p| (0.0..=255.0).contains(&p)));
    }

    #[test]
    fn points_off_the_image_are_ignored() {
        assert!(to_pixel((1.5, 0.0)).is_none());
        assert!(to_pixel((0.0, -1.2)).is_none());
        assert!(to_pixel((1.0, -1.0)).is_some());
    }
}
