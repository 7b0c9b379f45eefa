mod audio;

use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::Parser;
use log::{info, warn};
use pixels::{Pixels, SurfaceTexture};
use winit::{
    dpi::LogicalSize,
    event::{ElementState, Event, VirtualKeyCode, WindowEvent},
    event_loop::{ControlFlow, EventLoop},
    window::WindowBuilder,
};

use dotboy_core::{
    cartridge::Cartridge,
    diagnostics::{self, Level, LogSink},
    gameboy::GameBoy,
    input::Button,
    ppu::{SCREEN_HEIGHT, SCREEN_WIDTH},
};

/// 70224 cycles at 4.194304 MHz.
const FRAME_TIME: Duration = Duration::from_nanos(16_742_706);

/// Forwards core diagnostics into the `log` facade.
struct LogBridge;

impl LogSink for LogBridge {
    fn log(&self, level: Level, target: &'static str, args: std::fmt::Arguments) {
        let level = match level {
            Level::Trace => log::Level::Trace,
            Level::Info => log::Level::Info,
            Level::Warn => log::Level::Warn,
        };
        log::log!(target: target, level, "{args}");
    }
}

#[derive(Parser)]
#[command(name = "dotboy", about = "Game Boy (DMG) emulator")]
struct Args {
    /// Path to a ROM file; a file dialog opens when omitted
    rom: Option<PathBuf>,

    /// Run without a window or audio
    #[arg(long)]
    headless: bool,

    /// Number of frames to run in headless mode
    #[arg(long, default_value_t = 60)]
    frames: u64,

    /// Window scale factor
    #[arg(long, default_value_t = 3)]
    scale: u32,

    /// Disable audio output
    #[arg(long)]
    mute: bool,
}

fn main() {
    env_logger::init();
    let _ = diagnostics::try_set_log_sink(Box::new(LogBridge));
    let args = Args::parse();

    let mut gb = GameBoy::new();
    let mut title = String::from("dotboy");

    let rom_path = args.rom.clone().or_else(|| {
        if args.headless {
            None
        } else {
            rfd::FileDialog::new()
                .add_filter("Game Boy ROMs", &["gb", "gbc"])
                .pick_file()
        }
    });
    if let Some(path) = rom_path {
        match Cartridge::from_file(&path) {
            Ok(cart) => {
                title = format!("dotboy - {} ({})", cart.title, cart.mbc_name());
                gb.load_cart(cart);
            }
            // Keep running on the boot stub; the machine stays usable for
            // a later open attempt by relaunching.
            Err(e) => warn!("failed to load ROM {}: {e}", path.display()),
        }
    }

    if args.headless {
        for _ in 0..args.frames {
            gb.step_frame();
        }
        if let Err(e) = gb.save_cart_ram() {
            warn!("failed to save cartridge RAM: {e}");
        }
        return;
    }

    // Negotiate the device rate before the APU starts resampling.
    let mut audio_stream = None;
    let mut pace_backlog = 0usize;
    if !args.mute {
        if let Some((device, config)) = audio::output_device() {
            let sample_rate = config.sample_rate().0;
            let consumer = gb.mmu.apu.enable_output(sample_rate);
            audio_stream = audio::start_stream(device, config, consumer);
            if audio_stream.is_some() {
                info!("audio output at {sample_rate} Hz");
                // Run a frame whenever the queue is below ~5 frames of
                // buffered audio; the sink drains the rest of the latency.
                pace_backlog = (sample_rate / 12) as usize;
            }
        }
    }
    let has_audio = audio_stream.is_some();

    let event_loop = EventLoop::new();
    let window = WindowBuilder::new()
        .with_title(&title)
        .with_inner_size(LogicalSize::new(
            (SCREEN_WIDTH as u32 * args.scale) as f64,
            (SCREEN_HEIGHT as u32 * args.scale) as f64,
        ))
        .build(&event_loop)
        .expect("failed to create window");

    let size = window.inner_size();
    let surface = SurfaceTexture::new(size.width, size.height, &window);
    let mut pixels = Pixels::new(SCREEN_WIDTH as u32, SCREEN_HEIGHT as u32, surface)
        .expect("failed to create pixel surface");

    let mut next_frame = Instant::now();

    event_loop.run(move |event, _, control_flow| {
        let _ = &audio_stream;
        *control_flow = ControlFlow::Poll;
        match event {
            Event::WindowEvent { event, .. } => match event {
                WindowEvent::CloseRequested => {
                    if let Err(e) = gb.save_cart_ram() {
                        warn!("failed to save cartridge RAM: {e}");
                    }
                    *control_flow = ControlFlow::Exit;
                }
                WindowEvent::Resized(size) => {
                    let _ = pixels.resize_surface(size.width, size.height);
                }
                WindowEvent::KeyboardInput { input, .. } => {
                    if let Some(key) = input.virtual_keycode {
                        let pressed = input.state == ElementState::Pressed;
                        let button = match key {
                            VirtualKeyCode::Right => Some(Button::Right),
                            VirtualKeyCode::Left => Some(Button::Left),
                            VirtualKeyCode::Up => Some(Button::Up),
                            VirtualKeyCode::Down => Some(Button::Down),
                            VirtualKeyCode::Z => Some(Button::A),
                            VirtualKeyCode::X => Some(Button::B),
                            VirtualKeyCode::LShift | VirtualKeyCode::RShift => {
                                Some(Button::Select)
                            }
                            VirtualKeyCode::Return => Some(Button::Start),
                            VirtualKeyCode::Escape => {
                                if pressed {
                                    if let Err(e) = gb.save_cart_ram() {
                                        warn!("failed to save cartridge RAM: {e}");
                                    }
                                    *control_flow = ControlFlow::Exit;
                                }
                                None
                            }
                            _ => None,
                        };
                        if let Some(button) = button {
                            gb.set_button(button, pressed);
                        }
                    }
                }
                _ => {}
            },
            Event::MainEventsCleared => {
                // Pace against audio queue occupancy when a sink is running,
                // against the wall clock otherwise.
                let run = if has_audio {
                    gb.mmu.apu.output_backlog() < pace_backlog
                } else {
                    Instant::now() >= next_frame
                };
                if run {
                    gb.step_frame();
                    next_frame += FRAME_TIME;
                    let now = Instant::now();
                    if next_frame < now {
                        next_frame = now;
                    }
                    window.request_redraw();
                } else {
                    std::thread::sleep(Duration::from_millis(1));
                }
            }
            Event::RedrawRequested(_) => {
                // Framebuffer pixels are 0xAARRGGBB; the surface wants RGBA
                // bytes.
                let frame = gb.mmu.ppu.framebuffer();
                for (dst, &px) in pixels.frame_mut().chunks_exact_mut(4).zip(frame.iter()) {
                    dst[0] = (px >> 16) as u8;
                    dst[1] = (px >> 8) as u8;
                    dst[2] = px as u8;
                    dst[3] = 0xFF;
                }
                if pixels.render().is_err() {
                    *control_flow = ControlFlow::Exit;
                }
            }
            Event::LoopDestroyed => {
                if let Err(e) = gb.save_cart_ram() {
                    warn!("failed to save cartridge RAM: {e}");
                }
            }
            _ => {}
        }
    });
}
