//! Pure conversation-router logic: session-mode constants, closing-phrase and
//! intent matching, locale day handling, and chatbot response rendering.
//!
//! Everything here is side-effect free; persistence lives in the IPC handlers.

use chrono::{Datelike, Local};

/// A student is in a live teacher session while a teacher-directed message of
/// theirs is younger than this window. This is the sole session mechanism;
/// there is no persisted session row.
pub const SESSION_WINDOW_MINUTES: i64 = 30;

/// Phrases that end a live teacher session, matched by case-insensitive
/// containment.
pub const CLOSING_PHRASES: [&str; 8] = [
    "sudah jelas",
    "terima kasih",
    "terimakasih",
    "makasih",
    "selesai",
    "cukup",
    "sampai jumpa",
    "bye",
];

/// Locale day names indexed by days-from-Sunday.
pub const DAY_NAMES: [&str; 7] = [
    "Minggu", "Senin", "Selasa", "Rabu", "Kamis", "Jumat", "Sabtu",
];

pub fn is_closing_phrase(text: &str) -> bool {
    let lower = text.to_lowercase();
    CLOSING_PHRASES.iter().any(|p| lower.contains(p))
}

/// Today's locale day name, e.g. "Rabu" on a Wednesday.
pub fn today_day_name() -> &'static str {
    DAY_NAMES[Local::now().weekday().num_days_from_sunday() as usize]
}

/// School-week ordinal for grouping: Senin..Jumat rank 1..5. Days outside the
/// school week (and unknown strings) rank after Jumat, stable by insertion
/// order.
pub fn day_rank(day: &str) -> i64 {
    match day {
        "Senin" => 1,
        "Selasa" => 2,
        "Rabu" => 3,
        "Kamis" => 4,
        "Jumat" => 5,
        _ => 6,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    /// `today_only` is set when the message also asks for "hari ini"/"sekarang".
    Schedule { today_only: bool },
    GradesMenu,
    ReportMenu,
    News,
    Announcements,
    AskTeacher,
    Greeting,
    Help,
    Fallback,
}

/// First-match-wins over the fixed keyword list. Order matters: "nilai rapor"
/// must resolve to the report-card pointer, not the grades menu.
pub fn detect_intent(text: &str) -> Intent {
    let lower = text.to_lowercase();
    if lower.contains("jadwal") {
        return Intent::Schedule {
            today_only: lower.contains("hari ini") || lower.contains("sekarang"),
        };
    }
    if lower.contains("nilai") && !lower.contains("rapor") {
        return Intent::GradesMenu;
    }
    if lower.contains("rapor") {
        return Intent::ReportMenu;
    }
    if lower.contains("berita") {
        return Intent::News;
    }
    if lower.contains("pengumuman") || lower.contains("info") {
        return Intent::Announcements;
    }
    if lower.contains("tanya guru")
        || lower.contains("hubungi guru")
        || lower.contains("bicara guru")
        || lower.contains("chat guru")
    {
        return Intent::AskTeacher;
    }
    if lower.contains("halo") || lower.contains("hai") || lower.contains("hi") || lower.contains("hello")
    {
        return Intent::Greeting;
    }
    if lower.contains("bantuan") || lower.contains("help") {
        return Intent::Help;
    }
    Intent::Fallback
}

/// One schedule row as the chatbot renders it.
#[derive(Debug, Clone)]
pub struct ScheduleLine {
    pub day: String,
    pub subject: String,
    pub teacher: String,
}

/// Groups rows by day (school-week rank, then insertion order) and numbers
/// entries within each day from 1.
pub fn render_schedule(lines: &[ScheduleLine], today: Option<&str>) -> String {
    let mut ordered: Vec<&ScheduleLine> = lines.iter().collect();
    // Stable sort keeps insertion order within a day and among off-week days.
    ordered.sort_by_key(|l| day_rank(&l.day));

    let mut out = match today {
        Some(day) => format!("Jadwal Hari Ini ({}):\n\n", day),
        None => "Jadwal Pelajaran Kamu:\n\n".to_string(),
    };

    let mut current_day: Option<&str> = None;
    let mut number = 0;
    for line in ordered {
        if current_day != Some(line.day.as_str()) {
            if current_day.is_some() {
                out.push('\n');
            }
            out.push_str(&format!("{}:\n", line.day));
            current_day = Some(line.day.as_str());
            number = 0;
        }
        number += 1;
        out.push_str(&format!("{}. {} ({})\n", number, line.subject, line.teacher));
    }

    out.push_str("\nKetik \"jadwal hari ini\" untuk jadwal hari ini saja!");
    out
}

pub fn closing_ack() -> String {
    "Terima kasih! Chat dengan guru selesai. Jika ada pertanyaan lagi, ketik \"tanya guru\" ya!"
        .to_string()
}

pub fn live_forward_ack() -> String {
    "Pesan kamu sudah diteruskan ke guru. Mohon tunggu balasan ya!\n\nKetik \"selesai\" atau \"terima kasih\" untuk mengakhiri chat.".to_string()
}

pub fn ask_teacher_ack() -> String {
    "Pertanyaan kamu sudah diteruskan ke guru. Mohon tunggu balasan ya!\n\nKetik \"selesai\" atau \"terima kasih\" jika chat sudah selesai.".to_string()
}

pub fn schedule_empty() -> String {
    "Jadwal untuk kelas kamu belum tersedia.\n\nKetik \"tanya guru\" untuk bertanya langsung!"
        .to_string()
}

pub fn grades_menu() -> String {
    "Untuk melihat nilai kamu, silakan buka menu \"Nilai\" di sidebar. Di sana ada nilai tugas dan nilai harian.\n\nUntuk nilai rapor lengkap (UH, UTS, UAS), buka menu \"Rapor\".\n\nAda pertanyaan? Ketik \"tanya guru\"!".to_string()
}

pub fn report_menu() -> String {
    "Untuk melihat rapor lengkap kamu, silakan buka menu \"Rapor\" di sidebar. Di sana ada nilai UH1-UH4, UTS & UAS, rata-rata semester, dan komentar wali kelas.\n\nAda pertanyaan? Ketik \"tanya guru\"!".to_string()
}

pub fn news_menu() -> String {
    "Untuk membaca berita terbaru, silakan buka menu \"Berita & Pengumuman\" di sidebar.\n\nAda pertanyaan? Ketik \"tanya guru\"!".to_string()
}

pub fn announcements_menu() -> String {
    "Untuk melihat pengumuman terbaru, silakan buka menu \"Berita & Pengumuman\" di sidebar.\n\nAda pertanyaan? Ketik \"tanya guru\"!".to_string()
}

pub fn greeting(student_name: &str) -> String {
    format!(
        "Halo {}! Ada yang bisa saya bantu?\n\nCoba tanya:\n\"jadwal\" - Lihat jadwal pelajaran\n\"nilai\" - Info tentang nilai\n\"rapor\" - Lihat rapor\n\"berita\" - Berita terbaru\n\"pengumuman\" - Pengumuman sekolah\n\"tanya guru\" - Chat dengan guru",
        student_name
    )
}

pub fn help_text() -> String {
    "Panduan chatbot:\n\nJadwal pelajaran: ketik \"jadwal\" atau \"jadwal hari ini\"\nNilai: ketik \"nilai\"\nRapor: ketik \"rapor\"\nBerita: ketik \"berita\"\nPengumuman: ketik \"pengumuman\" atau \"info\"\nChat dengan guru: ketik \"tanya guru\"\n\nSilakan tanya apa saja!".to_string()
}

pub fn fallback(original: &str) -> String {
    format!(
        "Maaf, saya belum mengerti pertanyaan \"{}\".\n\nSaya bisa bantu dengan jadwal pelajaran, nilai & rapor, berita, dan pengumuman.\n\nKetik \"bantuan\" untuk panduan lengkap, atau \"tanya guru\" untuk chat dengan guru!",
        original
    )
}
