use crate::session::{PlayRequest, RecordingToggle, SessionController};
use crate::types::{PlaybackOutcome, SessionPhase, SessionStatus};
use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Gauge, Paragraph, Wrap},
    Frame, Terminal,
};
use std::io;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

/// TUIアプリケーション
pub struct TuiApp {
    session: SessionController,
    running: Arc<AtomicBool>,
    /// 直近の操作結果
    message: Option<(String, Color)>,
}

impl TuiApp {
    pub fn new(session: SessionController, running: Arc<AtomicBool>) -> Self {
        Self {
            session,
            running,
            message: None,
        }
    }

    /// TUIを起動
    pub fn run(&mut self) -> Result<()> {
        // ターミナルを初期化
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;

        loop {
            self.session.poll();
            let status = self.session.status();
            terminal.draw(|f| self.draw(f, &status))?;

            // イベントをポーリング（100msごと）
            if event::poll(Duration::from_millis(100))? {
                if let Event::Key(key) = event::read()? {
                    if key.kind != KeyEventKind::Press {
                        continue;
                    }
                    match key.code {
                        KeyCode::Char('q') | KeyCode::Esc => {
                            self.running.store(false, Ordering::SeqCst);
                            break;
                        }
                        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                            self.running.store(false, Ordering::SeqCst);
                            break;
                        }
                        KeyCode::Char('z') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                            // Ctrl+Z でプロセスを一時停止
                            disable_raw_mode()?;
                            execute!(io::stdout(), LeaveAlternateScreen)?;

                            #[cfg(unix)]
                            {
                                use nix::sys::signal::{self, Signal};
                                let _ = signal::raise(Signal::SIGTSTP);
                            }

                            // 再開後にターミナルを再初期化
                            enable_raw_mode()?;
                            execute!(io::stdout(), EnterAlternateScreen)?;
                            terminal.clear()?;
                        }
                        KeyCode::Char('r') => self.toggle_recording(),
                        KeyCode::Char('p') => self.play(),
                        KeyCode::Char('s') => self.stop_playback(),
                        _ => {}
                    }
                }
            }

            if !self.running.load(Ordering::SeqCst) {
                break;
            }
        }

        // ターミナルをリストア
        disable_raw_mode()?;
        execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
        terminal.show_cursor()?;

        Ok(())
    }

    fn toggle_recording(&mut self) {
        self.message = Some(match self.session.toggle_recording() {
            Ok(RecordingToggle::Started) => ("録音中...".to_string(), Color::Red),
            Ok(RecordingToggle::Saved(report)) => (
                format!(
                    "録音を保存しました ({:.1} 秒)",
                    self.session
                        .format()
                        .duration_of(report.bytes_written as usize)
                        .as_secs_f32()
                ),
                Color::Green,
            ),
            Ok(RecordingToggle::Rejected) => ("再生中は録音できません".to_string(), Color::Yellow),
            Err(e) => (e.to_string(), Color::Red),
        });
    }

    fn play(&mut self) {
        self.message = Some(match self.session.play(|_: f32| {}) {
            Ok(PlayRequest::Started) => ("再生中...".to_string(), Color::Blue),
            Ok(PlayRequest::Rejected) => ("録音中・再生中は再生できません".to_string(), Color::Yellow),
            Err(e) => (e.to_string(), Color::Red),
        });
    }

    fn stop_playback(&mut self) {
        self.message = match self.session.stop_playback() {
            Ok(Some(_)) => Some(("再生を停止しました".to_string(), Color::Yellow)),
            Ok(None) => None,
            Err(e) => Some((e.to_string(), Color::Red)),
        };
    }

    /// 画面を描画
    fn draw(&self, f: &mut Frame, status: &SessionStatus) {
        let block = Block::default()
            .title("pcm-recorder")
            .borders(Borders::ALL)
            .style(Style::default().fg(Color::White));

        let inner_area = block.inner(f.area());
        f.render_widget(block, f.area());

        let sections = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(1), // 状態
                Constraint::Length(1), // 保存先
                Constraint::Length(1), // 再生進捗
                Constraint::Length(1),
                Constraint::Min(0),    // メッセージ・エラー
                Constraint::Length(1), // 操作キー
            ])
            .split(inner_area);

        self.draw_state(f, sections[0], status);

        f.render_widget(Paragraph::new(saved_audio_line(status)), sections[1]);

        let gauge = Gauge::default()
            .gauge_style(Style::default().fg(Color::Cyan))
            .label(format!("{:.0}%", status.progress * 100.0))
            .ratio(status.progress.clamp(0.0, 1.0) as f64);
        f.render_widget(gauge, sections[2]);

        self.draw_messages(f, sections[4], status);

        let help = Paragraph::new("r: 録音開始/停止  p: 再生  s: 再生停止  q: 終了")
            .style(Style::default().fg(Color::DarkGray));
        f.render_widget(help, sections[5]);
    }

    fn draw_state(&self, f: &mut Frame, area: Rect, status: &SessionStatus) {
        let (text, color) = phase_label(status.phase());

        let mut spans = vec![
            Span::styled("状態: ", Style::default().fg(Color::White)),
            Span::styled(text, Style::default().fg(color).add_modifier(Modifier::BOLD)),
        ];
        if let Some(outcome) = &status.last_playback {
            spans.push(Span::raw("  "));
            spans.push(Span::styled(
                format!("前回の再生: {}", outcome_label(outcome)),
                Style::default().fg(Color::Gray),
            ));
        }

        f.render_widget(Paragraph::new(Line::from(spans)), area);
    }

    fn draw_messages(&self, f: &mut Frame, area: Rect, status: &SessionStatus) {
        let mut lines = Vec::new();
        if let Some((text, color)) = &self.message {
            lines.push(Line::from(Span::styled(text.clone(), Style::default().fg(*color))));
        }
        if let Some(err) = &status.last_error {
            lines.push(Line::from(Span::styled(
                format!("エラー: {}", err),
                Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
            )));
        }

        f.render_widget(Paragraph::new(lines).wrap(Wrap { trim: false }), area);
    }
}

/// 保存済み録音の表示行
fn saved_audio_line(status: &SessionStatus) -> String {
    if status.has_saved_audio {
        format!("Audio saved at: {}", status.file_path.display())
    } else {
        "No audio saved yet.".to_string()
    }
}

fn phase_label(phase: SessionPhase) -> (&'static str, Color) {
    match phase {
        SessionPhase::Idle => ("待機中", Color::Gray),
        SessionPhase::Recording => ("録音中", Color::Red),
        SessionPhase::Saved => ("保存済み", Color::Green),
        SessionPhase::Playing => ("再生中", Color::Blue),
    }
}

fn outcome_label(outcome: &PlaybackOutcome) -> &'static str {
    match outcome {
        PlaybackOutcome::Completed => "完了",
        PlaybackOutcome::Aborted(_) => "中断（エラー）",
        PlaybackOutcome::Cancelled => "停止",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn status(has_saved_audio: bool) -> SessionStatus {
        SessionStatus {
            is_recording: false,
            is_playing: false,
            has_saved_audio,
            progress: 0.0,
            file_path: PathBuf::from("/tmp/pcm-recorder/audio_record.pcm"),
            last_playback: None,
            last_error: None,
        }
    }

    #[test]
    fn test_saved_audio_line() {
        assert_eq!(
            saved_audio_line(&status(true)),
            "Audio saved at: /tmp/pcm-recorder/audio_record.pcm"
        );
        assert_eq!(saved_audio_line(&status(false)), "No audio saved yet.");
    }

    #[test]
    fn test_labels() {
        assert_eq!(phase_label(SessionPhase::Recording).0, "録音中");
        assert_eq!(outcome_label(&PlaybackOutcome::Aborted("x".to_string())), "中断（エラー）");
    }
}
