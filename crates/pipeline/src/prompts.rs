//! Prompt text for the generation calls.

pub const ANALYSIS_SYSTEM: &str = "You are an expert newsletter writer. You synthesize many short \
updates into one comprehensive newsletter, reusing the wording and format of the source \
material wherever possible.";

pub const KEYWORD_SYSTEM: &str = "You are an expert at identifying the key topics and themes \
of a text.";

pub const EVALUATION_SYSTEM: &str = "You are an editor reviewing newsletter drafts. You are \
strict, concise and always follow the requested response format.";

/// Keyword lists are capped at this many phrases.
pub const MAX_KEYWORDS: usize = 7;

pub fn analysis_prompt(category: &str, content: &str) -> String {
    format!(
        "Write a comprehensive {category} newsletter from all of the updates below.\n\n\
         Only use information that is directly relevant to {category}; ignore anything \
         about other sectors unless it directly affects {category}.\n\n\
         Structure the newsletter with these sections:\n\
         - Latest Developments in {category}\n\
         - Key {category} Trends\n\
         - {category} Analysis\n\
         - Industry Insights\n\
         - Future Outlook for {category}\n\n\
         Preserve every important {category} detail and weave the updates together \
         cohesively.\n\n\
         UPDATES:\n{content}"
    )
}

pub fn keyword_prompt(category: &str, analysis: &str) -> String {
    format!(
        "From the following {category} newsletter, identify the 5-{MAX_KEYWORDS} most \
         important topics or keywords. Respond with a single comma-separated list and \
         nothing else.\n\nNEWSLETTER:\n{analysis}"
    )
}

fn category_list(categories: &[&str]) -> String {
    categories
        .iter()
        .map(|category| format!("- {category}"))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn draft_system(categories: &[&str]) -> String {
    format!(
        "You are creating a daily digest newsletter covering exactly these categories:\n{}\n\n\
         Rules:\n\
         1. Only include content from the provided source material.\n\
         2. Never invent content that is not in the sources.\n\
         3. Only cover the listed categories, grouped under their exact names.\n\
         4. Keep the original details and facts.",
        category_list(categories)
    )
}

pub fn draft_prompt(sections: &[(String, String)], section_words: usize) -> String {
    let names: Vec<&str> = sections.iter().map(|(name, _)| name.as_str()).collect();
    let content = sections
        .iter()
        .map(|(name, analysis)| format!("Category: {name}\nContent:\n{analysis}"))
        .collect::<Vec<_>>()
        .join("\n\n");
    let low = section_words.saturating_sub(50);
    let high = section_words + 50;
    format!(
        "Create a multi-category newsletter from ONLY the content below.\n\n\
         Use these exact category headings:\n{}\n\n\
         Each section must be {low}-{high} words; the whole digest should be about {} \
         words. Use a friendly, engaging tone while staying factually accurate.\n\n\
         CONTENT BY CATEGORY:\n{content}",
        category_list(&names),
        section_words * sections.len(),
    )
}

pub fn evaluation_prompt(draft: &str, section_words: usize) -> String {
    let low = section_words.saturating_sub(50);
    let high = section_words + 50;
    format!(
        "Evaluate this newsletter draft.\n\n\
         Judge section length ({low}-{high} words each), writing quality and engagement, \
         factual accuracy and detail preservation, and overall structure and flow.\n\n\
         Respond exactly in this format:\n\
         Score: <number from 1 to 10>\n\
         Suggestions:\n\
         - <first suggestion>\n\
         - <second suggestion>\n\
         - <third suggestion>\n\n\
         DRAFT:\n{draft}"
    )
}

pub fn refine_system(categories: &[&str], feedback: &str) -> String {
    format!("{}\n\nEditor feedback to address:\n{feedback}", draft_system(categories))
}

pub fn refine_prompt(draft: &str, section_words: usize) -> String {
    format!(
        "Improve the newsletter draft below. Keep every fact, address the editor \
         feedback, keep the same category structure, keep each section around \
         {section_words} words and keep the tone friendly. Reply with the improved \
         newsletter as plain text only.\n\nDRAFT:\n{draft}"
    )
}
