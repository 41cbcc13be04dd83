// src/waveform/terminal.rs

use super::viewcache::ViewCache;

/// Draw one channel of the cache as text rows, `height` rows tall, from
/// the same line segments a graphical view would stroke. Columns the
/// cache has not computed yet stay blank.
pub fn render_ascii(cache: &ViewCache, channel: usize, height: usize) -> Vec<String> {
    let rows = height.max(4);
    let channels = cache.chunk().map_or(1, |c| c.format().channels as usize);
    let mut grid = vec![vec![' '; cache.width()]; rows];

    let lanes = cache.segments(rows * channels, 1.0);
    let lane_top = (rows * channel) as i32;
    let last_row = rows as i32 - 1;
    for seg in lanes.get(channel).into_iter().flatten() {
        let top = (seg.top - lane_top).clamp(0, last_row) as usize;
        let bottom = (seg.bottom - lane_top).clamp(0, last_row) as usize;
        for row in &mut grid[top..=bottom] {
            row[seg.x] = '█';
        }
    }
    grid.into_iter().map(|row| row.into_iter().collect()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::Chunk;
    use crate::datasource::DataSource;
    use crate::format::{SampleEncoding, SampleFormat};

    #[test]
    fn draws_a_full_scale_lane() {
        let fmt = SampleFormat::new(1, 8_000, SampleEncoding::F32);
        let samples: Vec<f32> = (0..400).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }).collect();
        let chunk = Chunk::from_source(DataSource::from_float(fmt, &samples));

        let mut cache = ViewCache::new(1 << 20);
        cache.update(&chunk, 0, 400, 4);
        cache.update(&chunk, 0, 400, 4);

        // lane of 5 rows: middle 2.5, one row of headroom above full scale
        let rows = render_ascii(&cache, 0, 5);
        assert_eq!(rows.len(), 5);
        assert_eq!(rows[0], "    ");
        assert!(rows[1..].iter().all(|r| r == "████"));
    }

    #[test]
    fn each_channel_gets_its_own_lane() {
        let fmt = SampleFormat::new(2, 8_000, SampleEncoding::F32);
        let samples: Vec<f32> = (0..400)
            .flat_map(|i| [0.0, if i % 2 == 0 { 1.0 } else { -1.0 }])
            .collect();
        let chunk = Chunk::from_source(DataSource::from_float(fmt, &samples));

        let mut cache = ViewCache::new(1 << 20);
        cache.update(&chunk, 0, 400, 4);
        cache.update(&chunk, 0, 400, 4);

        let quiet = render_ascii(&cache, 0, 5);
        assert_eq!(quiet[3], "████");
        assert!(quiet.iter().enumerate().all(|(i, r)| i == 3 || r == "    "));

        let loud = render_ascii(&cache, 1, 5);
        assert_eq!(loud[0], "    ");
        assert!(loud[1..].iter().all(|r| r == "████"));
    }

    #[test]
    fn unknown_columns_stay_blank() {
        let cache = ViewCache::new(1 << 20);
        assert!(render_ascii(&cache, 0, 4).iter().all(|r| r.is_empty()));
    }
}
