use chunkwise_protocol::{EventKind, ProgressEvent};

pub fn format_bytes(bytes: f64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{value:.0} {}", UNITS[unit])
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

pub fn format_event(event: &ProgressEvent) -> String {
    let what = match &event.kind {
        EventKind::ChunkAck { index } => format!("chunk {index} stored"),
        EventKind::AssemblyStarted => "assembling".to_string(),
        EventKind::UploadCompleted { job_id } => format!("completed (job {job_id})"),
        EventKind::UploadFailed { reason, can_resume } => {
            if *can_resume {
                format!("failed: {reason} (resumable)")
            } else {
                format!("failed: {reason}")
            }
        }
        EventKind::UploadPaused => "paused".to_string(),
        EventKind::UploadResumed { resume_cursor } => match resume_cursor {
            Some(cursor) => format!("resuming at chunk {cursor}"),
            None => "resuming".to_string(),
        },
        EventKind::UploadCancelled => "cancelled".to_string(),
    };

    let mut line = format!("[{:5.1}%] {what}", event.progress);
    if let Some(speed) = event.speed {
        line.push_str(&format!("  {}/s", format_bytes(speed)));
    }
    if let Some(eta) = event.eta_secs {
        line.push_str(&format!("  eta {}s", eta.ceil() as u64));
    }
    line
}

pub fn format_stored(indices: &[u32]) -> String {
    if indices.is_empty() {
        return "no chunks stored".to_string();
    }
    let mut sorted = indices.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let mut ranges: Vec<String> = Vec::new();
    let mut start = sorted[0];
    let mut prev = start;
    for &i in &sorted[1..] {
        if i != prev + 1 {
            ranges.push(range(start, prev));
            start = i;
        }
        prev = i;
    }
    ranges.push(range(start, prev));
    format!("{} chunks stored: {}", sorted.len(), ranges.join(", "))
}

fn range(start: u32, end: u32) -> String {
    if start == end {
        start.to_string()
    } else {
        format!("{start}-{end}")
    }
}
