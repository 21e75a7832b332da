//! UI rendering for the debugger.

use ratatui::{
    prelude::*,
    widgets::{Block, Borders, Paragraph, List, ListItem},
    style::{Color, Style, Modifier},
};
use super::app::{DebuggerApp, ROW_BYTES};

/// Main draw function.
pub fn draw(frame: &mut Frame, app: &DebuggerApp) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(55),
            Constraint::Percentage(45),
        ])
        .split(frame.area());

    // Left side: code, registers and status
    let left_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(10),
            Constraint::Length(7),
            Constraint::Length(3),
        ])
        .split(chunks[0]);

    draw_disassembly(frame, left_chunks[0], app);
    draw_registers(frame, left_chunks[1], app);
    draw_status(frame, left_chunks[2], app);

    // Right side: memory, call stack and help
    let right_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(10),
            Constraint::Length(6),
            Constraint::Length(4),
        ])
        .split(chunks[1]);

    draw_memory(frame, right_chunks[0], app);
    draw_call_stack(frame, right_chunks[1], app);
    draw_help(frame, right_chunks[2]);
}

/// Draw disassembly from the PC forward.
fn draw_disassembly(frame: &mut Frame, area: Rect, app: &DebuggerApp) {
    let disasm = app.get_disassembly((area.height as usize).saturating_sub(2));

    let items: Vec<ListItem> = disasm
        .iter()
        .map(|(addr, instr, is_current)| {
            let prefix = if *is_current { "▶ " } else { "  " };
            let bp = if app.breakpoints.contains(addr) { "●" } else { " " };
            let text = format!("{}{:04X}: {}", prefix, addr, instr);

            let style = if *is_current {
                Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
            } else if app.breakpoints.contains(addr) {
                Style::default().fg(Color::Red)
            } else {
                Style::default()
            };

            ListItem::new(format!("{} {}", bp, text)).style(style)
        })
        .collect();

    let list = List::new(items)
        .block(Block::default()
            .title(" Disassembly ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Cyan)));

    frame.render_widget(list, area);
}

/// Draw register state with flag coloring.
fn draw_registers(frame: &mut Frame, area: Rect, app: &DebuggerApp) {
    let regs = &app.vm.regs;

    let content = vec![
        Line::from(vec![
            Span::raw("PC:  "),
            Span::styled(format!("{:04X}", regs.pc), Style::default().fg(Color::Yellow)),
            Span::raw("   SP: "),
            Span::styled(format!("{:04X}", regs.sp), Style::default().fg(Color::White)),
        ]),
        Line::from(vec![
            Span::raw("ACC: "),
            Span::styled(format!("{:02X}", regs.acc), Style::default().fg(Color::White)),
            Span::raw(format!(" = {:>3} / {:>4}", regs.acc, regs.acc as i8)),
        ]),
        Line::from(vec![
            Span::raw("Flags: "),
            flag_span('N', regs.flags.negative),
            flag_span('Z', regs.flags.zero),
            flag_span('C', regs.flags.carry),
        ]),
        Line::from(vec![
            Span::raw("Cycles: "),
            Span::styled(format!("{}", app.vm.cycles), Style::default().fg(Color::Cyan)),
            Span::raw("   "),
            Span::styled(
                if app.running { "Running" } else { "Stopped" },
                if app.running {
                    Style::default().fg(Color::Green)
                } else {
                    Style::default().fg(Color::Red)
                },
            ),
        ]),
    ];

    let paragraph = Paragraph::new(content)
        .block(Block::default()
            .title(" Registers ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Green)));

    frame.render_widget(paragraph, area);
}

/// Draw memory as hex rows.
fn draw_memory(frame: &mut Frame, area: Rect, app: &DebuggerApp) {
    let visible_rows = (area.height as usize).saturating_sub(2);
    let pc = app.vm.pc() as usize;
    let sp = app.vm.sp() as usize;

    let items: Vec<ListItem> = (app.mem_scroll..app.mem_scroll + visible_rows)
        .map(|row| row * ROW_BYTES)
        .take_while(|&start| start < app.vm.capacity())
        .map(|start| {
            let bytes = app.vm.mem.slice(start, ROW_BYTES);
            let mut spans = vec![Span::styled(
                format!("{:04X}: ", start),
                Style::default().fg(Color::DarkGray),
            )];

            for (i, &byte) in bytes.iter().enumerate() {
                let addr = start + i;
                let style = if addr == pc {
                    Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
                } else if addr + 2 == sp || addr + 1 == sp {
                    Style::default().fg(Color::Magenta)
                } else if byte != 0 {
                    Style::default().fg(Color::White)
                } else {
                    Style::default().fg(Color::DarkGray)
                };
                spans.push(Span::styled(format!("{:02X} ", byte), style));
            }

            ListItem::new(Line::from(spans))
        })
        .collect();

    let list = List::new(items)
        .block(Block::default()
            .title(" Memory ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Magenta)));

    frame.render_widget(list, area);
}

/// Draw return addresses, innermost first.
fn draw_call_stack(frame: &mut Frame, area: Rect, app: &DebuggerApp) {
    let frames = app.vm.call_stack();
    let items: Vec<ListItem> = frames
        .iter()
        .rev()
        .map(|addr| ListItem::new(format!("→ {:04X}", addr)))
        .collect();

    let list = List::new(items)
        .block(Block::default()
            .title(format!(" Call stack ({}) ", frames.len()))
            .borders(Borders::ALL));

    frame.render_widget(list, area);
}

/// Draw status bar.
fn draw_status(frame: &mut Frame, area: Rect, app: &DebuggerApp) {
    let status = Paragraph::new(app.status.clone())
        .style(Style::default().fg(Color::White))
        .block(Block::default()
            .title(" Status ")
            .borders(Borders::ALL));

    frame.render_widget(status, area);
}

/// Draw help panel.
fn draw_help(frame: &mut Frame, area: Rect) {
    let help = Paragraph::new(vec![
        Line::from("s: Step  r: Run  p: Pause  b: Breakpoint"),
        Line::from("x: Reset  ↑↓: Scroll memory  q: Quit"),
    ])
    .style(Style::default().fg(Color::DarkGray))
    .block(Block::default()
        .title(" Help ")
        .borders(Borders::ALL));

    frame.render_widget(help, area);
}

/// Lit or dimmed flag letter.
fn flag_span(name: char, set: bool) -> Span<'static> {
    if set {
        Span::styled(format!("{} ", name), Style::default().fg(Color::Green).add_modifier(Modifier::BOLD))
    } else {
        Span::styled("- ".to_string(), Style::default().fg(Color::DarkGray))
    }
}
