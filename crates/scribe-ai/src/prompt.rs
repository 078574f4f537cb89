//! Prompt construction for comedy set analysis.

use scribe_models::Hints;

const FORMATTING_RULES: &str = "
Formatting Requirements:
- IMPORTANT: You MUST return the *entire original transcript text* with your labels inserted directly before the relevant segments.
- Do NOT alter or remove any part of the original transcript text itself.
- Maintain the original sequence of the transcript.
- Do not add any introductory or concluding remarks, only the labeled transcript.
";

/// Build the analyzer prompt.
///
/// A custom prompt replaces the default instructions. Its `{transcript}` and
/// `{set_list}` placeholders are filled in; without a `{transcript}`
/// placeholder the transcript is appended.
pub fn build_prompt(transcript: &str, hints: &Hints) -> String {
    let set_list = hints.set_list.as_deref().unwrap_or("");

    if let Some(custom) = hints.custom_prompt.as_deref() {
        let filled = custom
            .replace("{set_list}", set_list)
            .replace("{transcript}", transcript);
        if custom.contains("{transcript}") {
            return filled;
        }
        return format!("{}\n\nTranscript to analyze:\n{}", filled, transcript);
    }

    let mut instruction = String::from(
        "You are a professional comedy show organizer. Analyze this transcript and perform the following tasks:\n",
    );

    if set_list.trim().is_empty() {
        instruction.push_str(
            "1. Identify structured comedy bits in the transcript, and for each one, generate a concise descriptive title (3-5 words) based on its content, then label the segment as **NEW BIT: [Descriptive Title]**.\n",
        );
        instruction.push_str(
            "2. For any short, unrelated comments or brief audience interactions that are not part of a structured joke or new bit, label them as '**Riff**'.\n",
        );
    } else {
        instruction.push_str(&format!(
            "1. Match segments of the transcript to these bits from the provided set list:\n{}\n   Label these matched segments as '**Joke: [Matched Set List Title]**'.\n",
            set_list
        ));
        instruction.push_str(
            "2. Identify any other structured comedy bits in the transcript that aren't in the set list, and for each one, generate a concise descriptive title (3-5 words) based on its content, then label the segment as **NEW BIT: [Descriptive Title]**.\n",
        );
        instruction.push_str(
            "3. For any short, unrelated comments or brief audience interactions that are not part of a structured joke or new bit, label them as '**Riff**'.\n",
        );
    }

    instruction.push_str(FORMATTING_RULES);
    format!("{}\n\nTranscript to analyze:\n{}", instruction, transcript)
}

/// The default set-list prompt with `{set_list}` and `{transcript}` left as
/// placeholders, in the form accepted as a custom prompt.
pub fn default_template() -> String {
    let hints = Hints::new(Some("{set_list}".to_string()), None);
    build_prompt("{transcript}", &hints)
}
