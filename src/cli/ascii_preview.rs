use crate::core::detector::FaceBox;
use crate::core::overlay::FaceMark;
use crossterm::{
    cursor,
    event::{self, Event, KeyCode, KeyEvent},
    terminal::{self, ClearType},
};
use image::DynamicImage;
use std::io::{self, Write};

const ASCII_RAMP: &str = " .·:;+=xX#@";
const DEFAULT_WIDTH: usize = 80;
const DEFAULT_HEIGHT: usize = 30;

pub struct AsciiRenderer {
    width: usize,
    height: usize,
}

impl AsciiRenderer {
    pub fn new(width: Option<usize>, height: Option<usize>) -> Self {
        let (term_width, term_height) = terminal::size()
            .map(|(w, h)| (w as usize, h as usize))
            .unwrap_or((DEFAULT_WIDTH, DEFAULT_HEIGHT));

        Self {
            width: width.unwrap_or(term_width.min(DEFAULT_WIDTH)).max(1),
            height: height.unwrap_or(term_height.saturating_sub(4).min(DEFAULT_HEIGHT)).max(1),
        }
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// The frame as text with every face boxed and labelled, and `caption`
    /// on the top row.
    pub fn render_frame(&self, image: &DynamicImage, faces: &[FaceMark], caption: &str) -> String {
        let mut grid = self.image_to_ascii(image);
        let img_width = image.width() as f32;
        let img_height = image.height() as f32;

        for face in faces {
            if let Some((center_x, top)) = self.draw_face_box(&mut grid, &face.bbox, img_width, img_height) {
                // Above the box, or on its top edge when there is no room
                self.overlay_text(&mut grid, &face.label(), center_x, top.saturating_sub(1));
            }
        }
        self.overlay_text(&mut grid, caption, self.width / 2, 0);

        self.grid_to_string(&grid)
    }

    fn image_to_ascii(&self, image: &DynamicImage) -> Vec<Vec<char>> {
        let mut grid = vec![vec![' '; self.width]; self.height];
        let ramp: Vec<char> = ASCII_RAMP.chars().collect();

        let gray = image.to_luma8();
        let (img_width, img_height) = gray.dimensions();

        // Characters are about twice as tall as wide, so rows sample further apart
        for term_y in 0..self.height {
            for term_x in 0..self.width {
                let img_x = (term_x as f32 / self.width as f32 * img_width as f32) as u32;
                let img_y = (term_y as f32 / self.height as f32 * img_height as f32) as u32;

                if img_x < img_width && img_y < img_height {
                    let brightness = gray.get_pixel(img_x, img_y)[0];
                    let char_idx = (brightness as usize * (ramp.len() - 1)) / 255;
                    grid[term_y][term_x] = ramp[char_idx];
                }
            }
        }

        grid
    }

    fn overlay_text(&self, grid: &mut [Vec<char>], text: &str, center_x: usize, y: usize) {
        if y >= self.height {
            return;
        }

        let start_x = center_x.saturating_sub(text.chars().count() / 2);
        for (i, ch) in text.chars().enumerate() {
            let x = start_x + i;
            if x < self.width {
                grid[y][x] = ch;
            }
        }
    }

    /// Returns the box's center column and top row when it was drawn.
    fn draw_face_box(&self, grid: &mut [Vec<char>], face: &FaceBox, img_width: f32, img_height: f32) -> Option<(usize, usize)> {
        if img_width <= 0.0 || img_height <= 0.0 {
            return None;
        }
        let scale_x = |v: f32| (((v / img_width) * self.width as f32).max(0.0) as usize).min(self.width - 1);
        let scale_y = |v: f32| (((v / img_height) * self.height as f32).max(0.0) as usize).min(self.height - 1);

        let (x1, x2) = (scale_x(face.x1), scale_x(face.x2));
        let (y1, y2) = (scale_y(face.y1), scale_y(face.y2));
        if x2 <= x1 || y2 <= y1 {
            return None;
        }

        for x in (x1 + 1)..x2 {
            grid[y1][x] = '─';
            grid[y2][x] = '─';
        }
        for row in grid.iter_mut().take(y2).skip(y1 + 1) {
            row[x1] = '│';
            row[x2] = '│';
        }

        grid[y1][x1] = '┌';
        grid[y1][x2] = '┐';
        grid[y2][x1] = '└';
        grid[y2][x2] = '┘';

        Some(((x1 + x2) / 2, y1))
    }

    fn grid_to_string(&self, grid: &[Vec<char>]) -> String {
        grid.iter()
            .map(|row| row.iter().collect::<String>())
            .collect::<Vec<_>>()
            .join("\r\n")
    }
}

/// Redraws successive frames over each other instead of scrolling.
#[derive(Default)]
pub struct PreviewPainter {
    painted_height: usize,
}

impl PreviewPainter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn paint(&mut self, frame: &str) -> io::Result<()> {
        let mut stdout = io::stdout();
        let lines: Vec<&str> = frame.lines().collect();

        if self.painted_height > 1 {
            crossterm::execute!(
                stdout,
                cursor::MoveUp((self.painted_height - 1) as u16),
                cursor::MoveToColumn(0)
            )?;
        } else if self.painted_height == 1 {
            crossterm::execute!(stdout, cursor::MoveToColumn(0))?;
        }

        for (i, line) in lines.iter().enumerate() {
            crossterm::execute!(stdout, terminal::Clear(ClearType::CurrentLine))?;
            if i + 1 < lines.len() {
                writeln!(stdout, "{}", line.trim_end_matches('\r'))?;
            } else {
                write!(stdout, "{}", line)?;
            }
        }
        stdout.flush()?;

        self.painted_height = lines.len();
        Ok(())
    }

    /// Moves below the preview so later output does not overwrite it.
    pub fn finish(&mut self) {
        if self.painted_height > 0 {
            println!();
            self.painted_height = 0;
        }
    }
}

pub fn check_for_escape() -> io::Result<bool> {
    if event::poll(std::time::Duration::from_millis(0))? {
        if let Event::Key(KeyEvent { code, .. }) = event::read()? {
            return Ok(code == KeyCode::Esc);
        }
    }
    Ok(false)
}
